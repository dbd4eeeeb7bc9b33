//! Push provider abstraction and the HTTP gateway client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::config::PushSettings;
use crate::models::Platform;

/// Push delivery failure.
#[derive(Debug, Error)]
pub enum PushError {
    /// Provider hiccup; worth retrying.
    #[error("transient push failure: {0}")]
    Transient(String),
    /// Token is gone or rejected for good; the device must be deactivated.
    #[error("permanent push failure: {0}")]
    Permanent(String),
}

/// Provider acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReceipt {
    /// Accepted for delivery; no delivery confirmation available.
    Accepted,
    /// Provider confirmed delivery to the device.
    Delivered,
}

/// Notification content handed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Push gateway interface.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(
        &self,
        push_token: &str,
        platform: Platform,
        payload: &PushPayload,
    ) -> Result<PushReceipt, PushError>;
}

#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    data: Vec<GatewayTicket>,
}

#[derive(Debug, Deserialize)]
struct GatewayTicket {
    status: String,
    #[allow(dead_code)]
    id: Option<String>,
    message: Option<String>,
    details: Option<serde_json::Value>,
}

/// Expo-style HTTP push gateway client.
pub struct HttpPushClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpPushClient {
    pub fn new(settings: &PushSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            access_token: settings.access_token.clone(),
        }
    }
}

#[async_trait]
impl PushProvider for HttpPushClient {
    async fn send(
        &self,
        push_token: &str,
        _platform: Platform,
        payload: &PushPayload,
    ) -> Result<PushReceipt, PushError> {
        let message = GatewayMessage {
            to: push_token,
            title: &payload.title,
            body: &payload.body,
            data: &payload.data,
            sound: Some("default"),
        };

        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(ref token) = self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transient(format!("gateway unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("push gateway error {}: {}", status, body);
            // 4xx other than 429 will not get better on retry
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(PushError::Permanent(format!("gateway {}: {}", status, body)));
            }
            return Err(PushError::Transient(format!("gateway {}: {}", status, body)));
        }

        let parsed: GatewayResponse = response
            .json()
            .await
            .map_err(|e| PushError::Transient(format!("gateway response: {}", e)))?;

        for ticket in &parsed.data {
            if ticket.status == "error" {
                let detail_error = ticket
                    .details
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(|e| e.as_str())
                    .unwrap_or_default();
                let message = ticket.message.clone().unwrap_or_default();
                // Dead tokens must stop receiving attempts
                if detail_error == "DeviceNotRegistered" {
                    return Err(PushError::Permanent(format!(
                        "device not registered: {}",
                        message
                    )));
                }
                return Err(PushError::Transient(format!("ticket error: {}", message)));
            }
        }

        info!("push accepted for token");
        Ok(PushReceipt::Accepted)
    }
}
