//! Error types for the forwarding engine.

/// A transport call that did not go through.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Transport rejected the call: {0}")]
    Rejected(String),
}

/// Why a single rule/message pair was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("rule #{rule_id} has no destination set (source {source_spec:?})")]
    MissingDestination { rule_id: i64, source_spec: String },

    #[error("rule #{rule_id} has an invalid destination {destination:?}")]
    InvalidDestination { rule_id: i64, destination: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Configuration problems are never retried and always surface to the admin.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DispatchError::MissingDestination { .. } | DispatchError::InvalidDestination { .. }
        )
    }
}
