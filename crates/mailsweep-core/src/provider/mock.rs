use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::emails::MailboxLocation;

use super::{MailProvider, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Location(String),
    Archive(String),
    Trash(String),
}

#[derive(Default)]
struct MockState {
    locations: HashMap<String, MailboxLocation>,
    failures: HashMap<String, VecDeque<ProviderError>>,
    calls: Vec<ProviderCall>,
}

/// In-memory provider. Messages it has never seen are in the inbox. Failures
/// queued for a message are returned, one per call, before any real work.
#[derive(Clone, Default)]
pub struct MockMailProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockMailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_location(&self, provider_message_id: &str, location: MailboxLocation) {
        self.state()
            .locations
            .insert(provider_message_id.to_string(), location);
    }

    pub fn location(&self, provider_message_id: &str) -> MailboxLocation {
        self.state()
            .locations
            .get(provider_message_id)
            .copied()
            .unwrap_or(MailboxLocation::Inbox)
    }

    pub fn enqueue_failure(&self, provider_message_id: &str, error: ProviderError) {
        self.state()
            .failures
            .entry(provider_message_id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Archive and trash calls, whether or not they succeeded.
    pub fn mutation_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| !matches!(call, ProviderCall::Location(_)))
            .count()
    }

    fn handle(
        &self,
        call: ProviderCall,
        provider_message_id: &str,
        next: Option<MailboxLocation>,
    ) -> Result<MailboxLocation, ProviderError> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(err) = state
            .failures
            .get_mut(provider_message_id)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }

        let location = state
            .locations
            .entry(provider_message_id.to_string())
            .or_insert(MailboxLocation::Inbox);
        if let Some(next) = next {
            *location = next;
        }
        Ok(*location)
    }
}

#[async_trait]
impl MailProvider for MockMailProvider {
    async fn message_location(
        &self,
        provider_message_id: &str,
    ) -> Result<MailboxLocation, ProviderError> {
        self.handle(
            ProviderCall::Location(provider_message_id.to_string()),
            provider_message_id,
            None,
        )
    }

    async fn archive(&self, provider_message_id: &str) -> Result<(), ProviderError> {
        self.handle(
            ProviderCall::Archive(provider_message_id.to_string()),
            provider_message_id,
            Some(MailboxLocation::Archived),
        )
        .map(|_| ())
    }

    async fn trash(&self, provider_message_id: &str) -> Result<(), ProviderError> {
        self.handle(
            ProviderCall::Trash(provider_message_id.to_string()),
            provider_message_id,
            Some(MailboxLocation::Trashed),
        )
        .map(|_| ())
    }
}
