use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::emails::MailboxLocation;

use super::{MailProvider, ProviderError};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalMessage {
    #[serde(default)]
    label_ids: Vec<String>,
}

/// Gmail REST client authenticated with a pre-issued bearer token.
pub struct GmailProvider {
    http: Client,
    user_id: String,
    access_token: String,
    api_base: String,
}

impl GmailProvider {
    pub fn new(http: Client, user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http,
            user_id: user_id.into(),
            access_token: access_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn from_config(http: Client, config: &ProviderConfig) -> Self {
        Self::new(http, config.user_id.clone(), config.access_token.clone())
            .with_api_base(config.api_base.clone())
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn message_url(&self, provider_message_id: &str) -> String {
        format!(
            "{}/{}/messages/{}",
            self.api_base, self.user_id, provider_message_id
        )
    }

    async fn post(&self, context: &str, url: String, body: serde_json::Value) -> Result<(), ProviderError> {
        self.http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ProviderError::from_http(context, err))?;
        Ok(())
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn message_location(
        &self,
        provider_message_id: &str,
    ) -> Result<MailboxLocation, ProviderError> {
        let context = "get message";
        let message: MinimalMessage = self
            .http
            .get(self.message_url(provider_message_id))
            .query(&[("format", "minimal")])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ProviderError::from_http(context, err))?
            .json()
            .await
            .map_err(|err| ProviderError::from_http(context, err))?;

        let has = |label: &str| message.label_ids.iter().any(|l| l == label);
        Ok(if has("TRASH") {
            MailboxLocation::Trashed
        } else if has("INBOX") {
            MailboxLocation::Inbox
        } else {
            MailboxLocation::Archived
        })
    }

    async fn archive(&self, provider_message_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/modify", self.message_url(provider_message_id));
        self.post("archive message", url, json!({ "removeLabelIds": ["INBOX"] }))
            .await
    }

    async fn trash(&self, provider_message_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/trash", self.message_url(provider_message_id));
        self.post("trash message", url, json!({})).await
    }
}
