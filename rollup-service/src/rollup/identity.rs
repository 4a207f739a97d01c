//! Stable identities for controller boards.

use crate::models::BoardSighting;
use sha2::{Digest, Sha256};

/// Legacy product name and its current name.
const NAME_ALIASES: &[(&str, &str)] = &[("CopterControl", "CC3D")];

/// Identity of the board behind a sighting.
///
/// A reported UUID is used as-is. Without one, the CPU serial is hashed so
/// the raw serial is never stored. `None` when the board carries neither.
pub fn resolve_identity(sighting: &BoardSighting) -> Option<String> {
    if !sighting.uuid.is_empty() {
        return Some(sighting.uuid.clone());
    }
    if sighting.cpu.is_empty() {
        return None;
    }
    Some(hash_cpu_id(&sighting.cpu))
}

/// Lowercase hex SHA-256 of a CPU identifier.
pub fn hash_cpu_id(cpu: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cpu.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn canonical_board_name(name: &str) -> &str {
    NAME_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, current)| *current)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sighting(uuid: &str, cpu: &str) -> BoardSighting {
        BoardSighting {
            uuid: uuid.to_string(),
            cpu: cpu.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_uuid_is_used_verbatim() {
        let id = resolve_identity(&sighting("3f2a9c", "ABC123")).unwrap();
        assert_eq!(id, "3f2a9c");
    }

    #[test]
    fn test_cpu_is_hashed_when_uuid_missing() {
        let id = resolve_identity(&sighting("", "ABC123")).unwrap();
        assert_eq!(
            id,
            "e0bebd22819993425814866b62701e2919ea26f1370499c1037b53b9d49c2c8a"
        );
        assert_eq!(id.len(), 64);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_unidentifiable_board_is_skipped() {
        assert_eq!(resolve_identity(&sighting("", "")), None);
    }

    #[test]
    fn test_copter_control_is_renamed() {
        assert_eq!(canonical_board_name("CopterControl"), "CC3D");
    }

    #[test]
    fn test_other_names_pass_through() {
        for name in ["CC3D", "Revolution", "Sparky2", "coptercontrol", ""] {
            assert_eq!(canonical_board_name(name), name);
        }
    }

    proptest! {
        #[test]
        fn prop_cpu_identity_is_deterministic(cpu in "\\PC{1,64}") {
            let first = resolve_identity(&sighting("", &cpu)).unwrap();
            let second = resolve_identity(&sighting("", &cpu)).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, hex::encode(Sha256::digest(cpu.as_bytes())));
        }
    }
}
