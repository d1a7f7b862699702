//! # WiFi Geolocation Client
//!
//! Resolves a list of access points to a position through an HTTP service.
//!
//! Two wire formats are supported:
//! - `custom`: `{"wifiAccessPoints":[{"mac","rssi"}]}` answered with
//!   `{"latitude","longitude","accuracy"?,"altitude"?}`
//! - `mls`: `{"wifiAccessPoints":[{"macAddress","signalStrength"}]}` answered with
//!   `{"location":{"lat","lng"},"accuracy"}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GeoEstimate, Geolocator, WifiObservation};
use crate::config::{GeolocationFormat, WifiLocationConfig};
use crate::error::{Result, TrackerError};

#[derive(Debug, Serialize)]
struct CustomAccessPoint {
    mac: String,
    rssi: i16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MlsAccessPoint {
    mac_address: String,
    signal_strength: i16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocateRequest<T> {
    wifi_access_points: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CustomResponse {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: f64,
    #[serde(default)]
    accuracy: f64,
}

#[derive(Debug, Deserialize)]
struct MlsLocation {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct MlsResponse {
    location: MlsLocation,
    #[serde(default)]
    accuracy: f64,
}

/// Geolocation service client
#[derive(Debug, Clone)]
pub struct HttpGeolocator {
    client: reqwest::Client,
    url: String,
    format: GeolocationFormat,
}

impl HttpGeolocator {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, format: GeolocationFormat, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into(), format })
    }

    /// Build a client from configuration, `None` when no service is configured
    pub fn from_config(config: &WifiLocationConfig) -> Result<Option<Self>> {
        if !config.has_service() {
            return Ok(None);
        }

        Self::new(
            config.service_url(),
            config.format,
            Duration::from_secs(config.timeout_s),
        )
        .map(Some)
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<reqwest::Response> {
        let response = self.client.post(&self.url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Uplink(format!(
                "Geolocation service returned {}",
                status.as_u16()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Geolocator for HttpGeolocator {
    async fn locate(&self, access_points: &[WifiObservation]) -> Result<GeoEstimate> {
        debug!("Querying geolocation for {} access points", access_points.len());

        let estimate = match self.format {
            GeolocationFormat::Custom => {
                let request = LocateRequest {
                    wifi_access_points: access_points
                        .iter()
                        .map(|ap| CustomAccessPoint { mac: ap.mac.to_string(), rssi: ap.signal })
                        .collect(),
                };
                let body: CustomResponse = self.post(&request).await?.json().await?;
                GeoEstimate {
                    latitude: body.latitude,
                    longitude: body.longitude,
                    altitude: body.altitude,
                    accuracy: body.accuracy,
                }
            }
            GeolocationFormat::Mls => {
                let request = LocateRequest {
                    wifi_access_points: access_points
                        .iter()
                        .map(|ap| MlsAccessPoint {
                            mac_address: ap.mac.to_string(),
                            signal_strength: ap.signal,
                        })
                        .collect(),
                };
                let body: MlsResponse = self.post(&request).await?.json().await?;
                GeoEstimate {
                    latitude: body.location.lat,
                    longitude: body.location.lng,
                    altitude: 0.0,
                    accuracy: body.accuracy,
                }
            }
        };

        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::MacAddress;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn access_points() -> Vec<WifiObservation> {
        vec![
            WifiObservation { mac: MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]), signal: -48 },
            WifiObservation { mac: MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]), signal: -77 },
        ]
    }

    #[tokio::test]
    async fn test_custom_format() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/locate"))
            .and(body_json(json!({
                "wifiAccessPoints": [
                    { "mac": "aa:bb:cc:dd:ee:ff", "rssi": -48 },
                    { "mac": "00:11:22:33:44:55", "rssi": -77 },
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "latitude": 52.52,
                "longitude": 13.405,
                "accuracy": 25.0,
            })))
            .mount(&server)
            .await;

        let geo = HttpGeolocator::new(
            format!("{}/api/locate", server.uri()),
            GeolocationFormat::Custom,
            Duration::from_secs(10),
        )
        .unwrap();

        let estimate = geo.locate(&access_points()).await.unwrap();
        assert_eq!(estimate.latitude, 52.52);
        assert_eq!(estimate.longitude, 13.405);
        assert_eq!(estimate.accuracy, 25.0);
        assert_eq!(estimate.altitude, 0.0);
    }

    #[tokio::test]
    async fn test_mls_format() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/geolocate"))
            .and(body_json(json!({
                "wifiAccessPoints": [
                    { "macAddress": "aa:bb:cc:dd:ee:ff", "signalStrength": -48 },
                    { "macAddress": "00:11:22:33:44:55", "signalStrength": -77 },
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "location": { "lat": -33.8688, "lng": 151.2093 },
                "accuracy": 120.0,
            })))
            .mount(&server)
            .await;

        let geo = HttpGeolocator::new(
            format!("{}/v1/geolocate", server.uri()),
            GeolocationFormat::Mls,
            Duration::from_secs(10),
        )
        .unwrap();

        let estimate = geo.locate(&access_points()).await.unwrap();
        assert_eq!(estimate.latitude, -33.8688);
        assert_eq!(estimate.longitude, 151.2093);
        assert_eq!(estimate.accuracy, 120.0);
    }

    #[tokio::test]
    async fn test_service_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let geo =
            HttpGeolocator::new(server.uri(), GeolocationFormat::Custom, Duration::from_secs(10))
                .unwrap();

        assert!(geo.locate(&access_points()).await.is_err());
    }

    #[tokio::test]
    async fn test_unparseable_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "no match" })))
            .mount(&server)
            .await;

        let geo =
            HttpGeolocator::new(server.uri(), GeolocationFormat::Custom, Duration::from_secs(10))
                .unwrap();

        assert!(geo.locate(&access_points()).await.is_err());
    }

    #[test]
    fn test_from_config_without_service() {
        let config = WifiLocationConfig::default();
        assert!(HttpGeolocator::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_from_config_with_service() {
        let config = WifiLocationConfig {
            host: "geo.example.com".to_string(),
            ..WifiLocationConfig::default()
        };
        assert!(HttpGeolocator::from_config(&config).unwrap().is_some());
    }
}
