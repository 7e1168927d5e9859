use crate::{
    error::CourierError,
    message::{CanonicalMessage, MonitorRule},
};
use async_trait::async_trait;

/// The auth challenge a provider hands back when a session starts.
#[derive(Debug, Clone)]
pub enum AuthChallenge {
    /// QR payload to render for scanning.
    Qr { payload: String },
    /// The deployment pairs by phone number; the caller must follow up
    /// with `request_pairing_code`.
    PhonePairing,
}

/// Provider connector trait — the upstream messaging service.
///
/// The actual wire protocol lives behind this seam; Courier only sees
/// auth challenges, a socket lifecycle, and raw history payloads. Every
/// implementation must bound its own I/O with timeouts.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Human-readable connector name.
    fn name(&self) -> &str;

    /// Ask the provider for a fresh auth challenge for this session.
    async fn request_auth_challenge(
        &self,
        session_id: &str,
    ) -> Result<AuthChallenge, CourierError>;

    /// Request a phone pairing code. Returns `UnsupportedAuthMethod` when
    /// the deployment cannot pair by phone.
    async fn request_pairing_code(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<String, CourierError>;

    /// Open (or re-open) the provider socket for an authenticated session.
    async fn open_socket(&self, session_id: &str) -> Result<(), CourierError>;

    /// Fetch up to `limit` historical raw messages for a chat.
    async fn fetch_history(
        &self,
        session_id: &str,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, CourierError>;

    /// Tear down the provider side of a session.
    async fn close(&self, session_id: &str) -> Result<(), CourierError>;
}

/// Downstream sink trait — where ingested messages and rule matches go.
///
/// The consumer (agent engine, automation, summarizers) is external;
/// Courier only publishes through this interface.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// A newly stored canonical message.
    async fn publish(&self, message: &CanonicalMessage) -> Result<(), CourierError>;

    /// A monitor rule matched a message. Emitted at most once per
    /// (rule, message) pair.
    async fn on_rule_match(
        &self,
        rule: &MonitorRule,
        message: &CanonicalMessage,
    ) -> Result<(), CourierError>;
}
