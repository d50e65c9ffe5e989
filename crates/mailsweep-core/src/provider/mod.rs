//! The mail provider seam: where archive and trash actually happen.

pub mod gmail;
pub mod mock;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::emails::MailboxLocation;
use crate::rules::RuleAction;

pub use gmail::GmailProvider;
pub use mock::{MockMailProvider, ProviderCall};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("provider server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Rate limiting, server errors and transport failures may succeed on a
    /// later attempt. Everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Server(_) | ProviderError::Network(_)
        )
    }

    pub(crate) fn from_http(context: &str, err: reqwest::Error) -> Self {
        match err.status() {
            Some(StatusCode::NOT_FOUND) => {
                ProviderError::NotFound(format!("{context}: resource not found (404)"))
            }
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                ProviderError::RateLimited(format!("{context}: rate limited (429)"))
            }
            Some(StatusCode::UNAUTHORIZED) => {
                ProviderError::Unauthorized(format!("{context}: unauthorized (401)"))
            }
            Some(status) if status.is_server_error() => {
                ProviderError::Server(format!("{context}: server error {status}"))
            }
            Some(status) => ProviderError::Rejected(format!("{context}: http status {status}")),
            None if err.is_decode() => ProviderError::Decode(format!("{context}: {err}")),
            None => ProviderError::Network(format!("{context}: {err}")),
        }
    }
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn message_location(
        &self,
        provider_message_id: &str,
    ) -> Result<MailboxLocation, ProviderError>;

    async fn archive(&self, provider_message_id: &str) -> Result<(), ProviderError>;

    async fn trash(&self, provider_message_id: &str) -> Result<(), ProviderError>;

    async fn apply(&self, action: RuleAction, provider_message_id: &str) -> Result<(), ProviderError> {
        match action {
            RuleAction::Archive => self.archive(provider_message_id).await,
            RuleAction::Trash => self.trash(provider_message_id).await,
        }
    }
}

/// Whether a message at `location` already reflects `action`.
pub fn action_in_effect(action: RuleAction, location: MailboxLocation) -> bool {
    match action {
        // Trashed mail has left the inbox, so archiving it would be a no-op.
        RuleAction::Archive => location != MailboxLocation::Inbox,
        RuleAction::Trash => location == MailboxLocation::Trashed,
    }
}

/// The location a message ends up in after `action` succeeds.
pub fn location_after(action: RuleAction) -> MailboxLocation {
    match action {
        RuleAction::Archive => MailboxLocation::Archived,
        RuleAction::Trash => MailboxLocation::Trashed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited("x".into()).is_retryable());
        assert!(ProviderError::Server("x".into()).is_retryable());
        assert!(ProviderError::Network("x".into()).is_retryable());
        assert!(!ProviderError::NotFound("x".into()).is_retryable());
        assert!(!ProviderError::Rejected("x".into()).is_retryable());
        assert!(!ProviderError::Unauthorized("x".into()).is_retryable());
    }

    #[test]
    fn action_in_effect_by_location() {
        use MailboxLocation::*;
        assert!(!action_in_effect(RuleAction::Archive, Inbox));
        assert!(action_in_effect(RuleAction::Archive, Archived));
        assert!(action_in_effect(RuleAction::Archive, Trashed));
        assert!(!action_in_effect(RuleAction::Trash, Inbox));
        assert!(!action_in_effect(RuleAction::Trash, Archived));
        assert!(action_in_effect(RuleAction::Trash, Trashed));
    }
}
