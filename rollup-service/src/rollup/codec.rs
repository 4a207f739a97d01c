//! gzip framing for usage reports at rest and for work items on the queue.

use crate::error::RollupError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Writes into memory, so an error here means the encoder itself failed.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, RollupError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RollupError::corrupt("error ungzipping", e))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_report() {
        let data = br#"{"BoardsSeen":[{"CPU":"ABC123"}],"ShareIP":"true"}"#;
        let compressed = compress(data).unwrap();
        assert_ne!(compressed.as_slice(), data.as_slice());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_round_trip_empty() {
        let compressed = compress(b"").unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_compress_is_deterministic() {
        let data = b"same input, same bytes";
        assert_eq!(compress(data).unwrap(), compress(data).unwrap());
    }

    #[test]
    fn test_decompress_rejects_plain_json() {
        let err = decompress(br#"{"not":"gzip"}"#).unwrap_err();
        assert!(matches!(err, RollupError::CorruptPayload(_)));
    }

    #[test]
    fn test_decompress_rejects_truncated_stream() {
        let compressed = compress(b"a reasonably long payload to truncate").unwrap();
        let err = decompress(&compressed[..compressed.len() / 2]).unwrap_err();
        assert!(matches!(err, RollupError::CorruptPayload(_)));
    }

    proptest! {
        #[test]
        fn prop_decompress_inverts_compress(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let compressed = compress(&data).unwrap();
            prop_assert_eq!(decompress(&compressed).unwrap(), data);
        }
    }
}
