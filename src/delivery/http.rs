//! HTTP/JSON uplink: one POST per record

use std::time::Duration;

use tracing::{debug, warn};

use super::{ConnectionState, Delivery};
use crate::error::Result;
use crate::json::{encode_json, is_success_status, request_headers};
use crate::location::LocationRecord;

/// Stateless HTTP session
pub struct HttpUplink {
    client: reqwest::Client,
    url: String,
    imei: String,
    state: ConnectionState,
}

impl HttpUplink {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, imei: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            imei: imei.into(),
            state: ConnectionState::Disconnected,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// No session to open; marks the uplink usable
    pub fn connect(&mut self) -> bool {
        self.state = ConnectionState::Connected;
        true
    }

    /// POST one record
    ///
    /// 200, 201 and 204 are delivered; any other status or a transport error
    /// fails and marks the uplink disconnected.
    pub async fn send(&mut self, record: &LocationRecord) -> Delivery {
        if self.state != ConnectionState::Connected {
            self.connect();
        }

        let body = match encode_json(record, &self.imei) {
            Ok(body) => body,
            Err(e) => {
                warn!("JSON encode failed: {}", e);
                return Delivery::Failed;
            }
        };

        let mut request = self.client.post(&self.url);
        for (name, value) in request_headers(&self.imei) {
            request = request.header(name, value);
        }

        match request.body(body).send().await {
            Ok(response) if is_success_status(response.status().as_u16()) => {
                debug!("Collector accepted record: {}", response.status());
                Delivery::Delivered
            }
            Ok(response) => {
                warn!("Collector rejected record: {}", response.status());
                self.state = ConnectionState::Disconnected;
                Delivery::Failed
            }
            Err(e) => {
                warn!("HTTP send failed: {}", e);
                self.state = ConnectionState::Disconnected;
                Delivery::Failed
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
