//! Where a usage report came from, as told by the fronting proxy.
//!
//! The address is the first hop of `X-Forwarded-For`; coarse geolocation
//! arrives in `X-Geo-*` headers. Missing headers leave fields empty.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const GEO_COUNTRY_HEADER: &str = "x-geo-country";
pub const GEO_REGION_HEADER: &str = "x-geo-region";
pub const GEO_CITY_HEADER: &str = "x-geo-city";
/// `lat,lon` in decimal degrees.
pub const GEO_LATLONG_HEADER: &str = "x-geo-latlong";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOrigin {
    pub addr: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

impl ClientOrigin {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let addr = header(FORWARDED_FOR_HEADER)
            .split(',')
            .next()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let (lat, lon) = parse_latlong(&header(GEO_LATLONG_HEADER)).unwrap_or((0.0, 0.0));

        Self {
            addr,
            country: header(GEO_COUNTRY_HEADER),
            region: header(GEO_REGION_HEADER),
            city: header(GEO_CITY_HEADER),
            lat,
            lon,
        }
    }
}

fn parse_latlong(value: &str) -> Option<(f64, f64)> {
    let (lat, lon) = value.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientOrigin::from_headers(&parts.headers))
    }
}
