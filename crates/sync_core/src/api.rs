use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{ChatroomId, MessageId},
    protocol::MessagePage,
};

/// Paginated message query collaborator.
///
/// `fetch_messages` returns pages newest-first; `before` is the opaque
/// cursor from a previous page and requests strictly older messages.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn fetch_messages(
        &self,
        chatroom_id: &ChatroomId,
        limit: u32,
        before: Option<&str>,
    ) -> Result<MessagePage>;

    async fn mark_read(&self, message_id: &MessageId) -> Result<()>;

    async fn mark_all_read(&self, chatroom_id: &ChatroomId) -> Result<()>;
}

#[derive(Serialize)]
struct ListMessagesQuery<'a> {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<&'a str>,
}

/// REST-backed implementation of [`MessageApi`].
pub struct HttpMessageApi {
    http: Client,
    base_url: String,
    auth_token: String,
}

impl HttpMessageApi {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn fetch_messages(
        &self,
        chatroom_id: &ChatroomId,
        limit: u32,
        before: Option<&str>,
    ) -> Result<MessagePage> {
        let limit = limit.clamp(1, 100);
        let page: MessagePage = self
            .http
            .get(format!(
                "{}/chatrooms/{}/messages",
                self.base_url, chatroom_id
            ))
            .bearer_auth(&self.auth_token)
            .query(&ListMessagesQuery { limit, before })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid message page for chatroom {chatroom_id}"))?;
        Ok(page)
    }

    async fn mark_read(&self, message_id: &MessageId) -> Result<()> {
        self.http
            .post(format!("{}/messages/{}/read", self.base_url, message_id))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mark_all_read(&self, chatroom_id: &ChatroomId) -> Result<()> {
        self.http
            .post(format!(
                "{}/chatrooms/{}/read_all",
                self.base_url, chatroom_id
            ))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
