use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ConversationId,
    protocol::{ConversationSummary, MessagePayload},
};

/// Authoritative conversation query API, used for initial hydration and for
/// resync after a connection gap.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationSummary>;
    async fn fetch_transcript(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>>;
}

pub struct HttpConversationApi {
    http: Client,
    base_url: String,
    auth_token: String,
}

impl HttpConversationApi {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self
            .http
            .get(format!("{}/conversations", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(conversations)
    }

    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationSummary> {
        let conversation = self
            .http
            .get(format!(
                "{}/conversations/{}",
                self.base_url, conversation_id.0
            ))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(conversation)
    }

    async fn fetch_transcript(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>> {
        let messages = self
            .http
            .get(format!(
                "{}/conversations/{}/messages",
                self.base_url, conversation_id.0
            ))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }
}

/// Null object for contexts without a query API wired up (tests, bootstrap).
pub struct MissingConversationApi;

#[async_trait]
impl ConversationApi for MissingConversationApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Err(anyhow!("conversation query api is unavailable"))
    }

    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationSummary> {
        Err(anyhow!(
            "conversation query api is unavailable for conversation {}",
            conversation_id.0
        ))
    }

    async fn fetch_transcript(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>> {
        Err(anyhow!(
            "conversation query api is unavailable for conversation {}",
            conversation_id.0
        ))
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
