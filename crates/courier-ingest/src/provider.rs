//! HTTP provider connector.
//!
//! Speaks to a provider gateway's REST surface. Every call is bounded by
//! the client-wide timeout from [`ProviderConfig`]; failures surface as
//! `Connector` errors for the session manager to turn into state.

use async_trait::async_trait;
use courier_core::{
    config::ProviderConfig,
    traits::{AuthChallenge, ProviderConnector},
    CourierError,
};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub struct HttpConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    method: String,
    #[serde(default)]
    qr: Option<String>,
}

#[derive(Deserialize)]
struct PairingResponse {
    code: String,
}

impl HttpConnector {
    pub fn new(config: &ProviderConfig) -> Result<Self, CourierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Connector(format!("http client build failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(ref key) = self.api_key {
            req = req.header("X-Api-Key", key);
        }
        req
    }
}

#[async_trait]
impl ProviderConnector for HttpConnector {
    fn name(&self) -> &str {
        "http"
    }

    async fn request_auth_challenge(
        &self,
        session_id: &str,
    ) -> Result<AuthChallenge, CourierError> {
        let resp = self
            .request(Method::POST, &format!("/sessions/{session_id}/auth"))
            .send()
            .await
            .map_err(|e| CourierError::Connector(format!("auth challenge request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CourierError::Connector(format!(
                "auth challenge returned {}",
                resp.status()
            )));
        }

        let challenge: ChallengeResponse = resp
            .json()
            .await
            .map_err(|e| CourierError::Connector(format!("auth challenge parse failed: {e}")))?;

        match challenge.method.as_str() {
            "phone" => Ok(AuthChallenge::PhonePairing),
            _ => challenge
                .qr
                .map(|payload| AuthChallenge::Qr { payload })
                .ok_or_else(|| {
                    CourierError::Connector("auth challenge carried no QR payload".into())
                }),
        }
    }

    async fn request_pairing_code(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<String, CourierError> {
        let resp = self
            .request(
                Method::POST,
                &format!("/sessions/{session_id}/pairing-code"),
            )
            .json(&serde_json::json!({ "phoneNumber": phone_number }))
            .send()
            .await
            .map_err(|e| CourierError::Connector(format!("pairing code request failed: {e}")))?;

        match resp.status() {
            status if status.is_success() => {
                let pairing: PairingResponse = resp.json().await.map_err(|e| {
                    CourierError::Connector(format!("pairing code parse failed: {e}"))
                })?;
                Ok(pairing.code)
            }
            StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED => {
                Err(CourierError::UnsupportedAuthMethod(
                    "this provider deployment does not offer phone pairing; \
                     scan the QR challenge instead"
                        .into(),
                ))
            }
            status => Err(CourierError::Connector(format!(
                "pairing code request returned {status}"
            ))),
        }
    }

    async fn open_socket(&self, session_id: &str) -> Result<(), CourierError> {
        let resp = self
            .request(Method::POST, &format!("/sessions/{session_id}/connect"))
            .send()
            .await
            .map_err(|e| CourierError::Connector(format!("socket open failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CourierError::Connector(format!(
                "socket open returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn fetch_history(
        &self,
        session_id: &str,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<Value>, CourierError> {
        let resp = self
            .request(
                Method::GET,
                &format!("/sessions/{session_id}/chats/{chat_id}/messages"),
            )
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| CourierError::Connector(format!("history fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CourierError::Connector(format!(
                "history fetch returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| CourierError::Connector(format!("history parse failed: {e}")))
    }

    async fn close(&self, session_id: &str) -> Result<(), CourierError> {
        let resp = self
            .request(Method::POST, &format!("/sessions/{session_id}/stop"))
            .send()
            .await
            .map_err(|e| CourierError::Connector(format!("session close failed: {e}")))?;

        // Already gone is fine — stop is idempotent end to end.
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(CourierError::Connector(format!(
                "session close returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
