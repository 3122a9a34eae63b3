//! Reverse geocoding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Reverse-geocoded place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub display_name: String,
    #[serde(default)]
    pub address: PlaceAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceAddress {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub city: String,
}

/// Resolves coordinates to a human-readable place.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, latitude: &str, longitude: &str) -> Result<Place, SagaError>;
}

/// Nominatim reverse lookup.
///
/// Nominatim rejects requests without an identifying `User-Agent`.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: impl Into<String>, user_agent: &str) -> Result<Self, SagaError> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| SagaError::Geocoding(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[tracing::instrument(skip(self))]
    async fn reverse(&self, latitude: &str, longitude: &str) -> Result<Place, SagaError> {
        let response = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[("lat", latitude), ("lon", longitude), ("format", "json")])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| SagaError::Geocoding(e.to_string()))?;

        response
            .json::<Place>()
            .await
            .map_err(|e| SagaError::Geocoding(format!("Failed to decode response: {e}")))
    }
}

#[derive(Debug, Default)]
struct InMemoryGeocoderState {
    fail: AtomicBool,
    calls: AtomicUsize,
}

/// In-memory geocoder for testing.
#[derive(Debug, Clone)]
pub struct InMemoryGeocoder {
    place: Place,
    state: Arc<InMemoryGeocoderState>,
}

impl InMemoryGeocoder {
    /// Creates a geocoder that resolves every coordinate to `display_name`.
    pub fn new(display_name: &str) -> Self {
        Self {
            place: Place {
                display_name: display_name.to_string(),
                address: PlaceAddress::default(),
            },
            state: Arc::default(),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryGeocoder {
    fn default() -> Self {
        Self::new("Null Island")
    }
}

#[async_trait]
impl Geocoder for InMemoryGeocoder {
    async fn reverse(&self, _latitude: &str, _longitude: &str) -> Result<Place, SagaError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(SagaError::Geocoding("lookup unavailable".to_string()));
        }
        Ok(self.place.clone())
    }
}
