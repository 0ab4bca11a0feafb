use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Clone, Debug)]
pub struct LocationConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl LocationConfig {
    pub fn new_from_env() -> Self {
        let api_url = env::var("LOCATION_API_URL")
            .unwrap_or_else(|_| "http://ip-api.com/json".to_string());
        let timeout_secs = env::var("LOCATION_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        Self {
            api_url,
            timeout_secs,
        }
    }
}

/// Resolves the caller's coarse geolocation. `Ok(None)` means the provider
/// could not determine a position; downstream verification must treat that
/// as a failure to verify, never as a pass.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn get_location(&self) -> Result<Option<GeoPoint>, AppError>;
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    lat: f64,
    lon: f64,
}

pub struct HttpLocationProvider {
    client: Client,
    config: LocationConfig,
}

impl HttpLocationProvider {
    pub fn new(config: LocationConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ExternalService(format!("Failed to build http client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl LocationProvider for HttpLocationProvider {
    async fn get_location(&self) -> Result<Option<GeoPoint>, AppError> {
        let response = match self.client.get(&self.config.api_url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("location provider unreachable: {}", e);
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!("location provider returned {}", response.status());
            return Ok(None);
        }

        match response.json::<LocationResponse>().await {
            Ok(body) => Ok(Some(GeoPoint {
                latitude: body.lat,
                longitude: body.lon,
            })),
            Err(e) => {
                warn!("failed to parse location provider response: {}", e);
                Ok(None)
            }
        }
    }
}

/// Test double returning a preset position (or none).
pub struct FixedLocationProvider {
    point: Option<GeoPoint>,
}

impl FixedLocationProvider {
    pub fn new(point: Option<GeoPoint>) -> Self {
        Self { point }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn get_location(&self) -> Result<Option<GeoPoint>, AppError> {
        Ok(self.point)
    }
}
