// HTTP geolocation resolver
//
// Looks up `{base_url}{address}` on a freegeoip-compatible service and maps
// the response into a LocationRecord. One attempt per request, bounded by the
// client-wide timeout. Only literal IP addresses ever reach the URL.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::GeoConfig;
use crate::error::GeoLookupError;
use crate::event::LocationRecord;
use crate::traits::GeoResolver;

/// Pick the address to geolocate: the first `X-Forwarded-For` entry when it
/// is an IP address, otherwise the direct peer address.
pub fn client_address(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<String> {
    let forwarded = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());

    let parsed = match forwarded {
        Some(first) => match first.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(forwarded_for = first, "Ignoring non-IP X-Forwarded-For entry");
                None
            }
        },
        None => None,
    };

    parsed.or(peer).map(|ip| ip.to_string())
}

/// Response shape of freegeoip-style services
#[derive(Debug, Deserialize)]
struct GeoResponse {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    region_code: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

impl From<GeoResponse> for LocationRecord {
    fn from(r: GeoResponse) -> Self {
        Self {
            lat: r.latitude,
            lon: r.longitude,
            country_code: r.country_code.unwrap_or_default(),
            country_name: r.country_name.unwrap_or_default(),
            region_code: r.region_code.unwrap_or_default(),
            region_name: r.region_name.unwrap_or_default(),
            city: r.city.unwrap_or_default(),
        }
    }
}

/// GeoResolver backed by an external HTTP service
#[derive(Debug, Clone)]
pub struct HttpGeoResolver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGeoResolver {
    pub fn new(config: GeoConfig) -> Result<Self, GeoLookupError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeoLookupError::Unreachable(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url,
            timeout: config.timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> GeoLookupError {
        if err.is_timeout() {
            GeoLookupError::Timeout(self.timeout)
        } else if err.is_decode() {
            GeoLookupError::Malformed(err.to_string())
        } else {
            GeoLookupError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn resolve(&self, address: &str) -> Result<LocationRecord, GeoLookupError> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| GeoLookupError::InvalidAddress(address.to_string()))?;
        let url = format!("{}{}", self.base_url, ip);
        tracing::debug!(%url, "Resolving client location");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoLookupError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let parsed: GeoResponse = serde_json::from_slice(&body)
            .map_err(|e| GeoLookupError::Malformed(e.to_string()))?;

        Ok(parsed.into())
    }
}
