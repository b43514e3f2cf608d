//! Chat persistence gateway
//!
//! The chat backend owns conversations and their transcripts; ids are
//! issued by the backend at creation. The gateway wraps the store with
//! caller-side dedup so re-saving an unchanged transcript never hits
//! the wire, and appends only the new tail when the transcript grew.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{ChatDetail, ChatRecord, StoredMessage};
use crate::Result;

/// Raw operations against the chat backend.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn chats_for_customer(&self, customer_id: &str) -> Result<Vec<ChatRecord>>;

    /// Create a conversation and return the backend-issued chat id.
    async fn create_chat(&self, customer_id: &str, title: &str) -> Result<String>;

    async fn append_messages(
        &self,
        chat_id: &str,
        customer_id: &str,
        messages: &[StoredMessage],
    ) -> Result<()>;

    async fn chat_detail(&self, chat_id: &str) -> Result<ChatDetail>;

    async fn set_summary(&self, chat_id: &str, summary: &str) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatsEnvelope {
    #[serde(default)]
    chats: Vec<ChatRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatEnvelope {
    #[serde(default)]
    chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatDetailEnvelope {
    #[serde(default)]
    chat: ChatDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendMessagesBody<'a> {
    chat_id: &'a str,
    customer_id: &'a str,
    messages: &'a [StoredMessage],
}

/// HTTP client for the chat backend (connection-pooled).
#[derive(Clone)]
pub struct HttpChatStore {
    client: Client,
    base_url: String,
}

impl HttpChatStore {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build from `CHAT_API_BASE_URL`, falling back to the servicing
    /// base URL since the original deployment served both.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("CHAT_API_BASE_URL")
            .or_else(|_| env::var("SERVICING_API_BASE_URL"))
            .ok()?;
        Some(Self::new(&base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request_failed(path: &str, e: reqwest::Error) -> DispatchError {
        error!("Chat API request failed for {}: {}", path, e);
        DispatchError::PersistenceError(format!("Chat API request failed for {}: {}", path, e))
    }

    fn bad_status(path: &str, status: StatusCode) -> DispatchError {
        DispatchError::PersistenceError(format!("Chat API returned {} for {}", status, path))
    }
}

#[async_trait]
impl ChatStore for HttpChatStore {
    async fn chats_for_customer(&self, customer_id: &str) -> Result<Vec<ChatRecord>> {
        let path = "/api/Chat/GetChatsForCustomer";
        let response = self
            .client
            .get(self.url(path))
            .header("customerId", customer_id)
            .send()
            .await
            .map_err(|e| Self::request_failed(path, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Self::bad_status(path, status));
        }

        let envelope: ChatsEnvelope = response.json().await.map_err(|e| {
            DispatchError::PersistenceError(format!("Invalid JSON from {}: {}", path, e))
        })?;
        Ok(envelope.chats)
    }

    async fn create_chat(&self, customer_id: &str, title: &str) -> Result<String> {
        let path = "/api/Chat/CreateChat";
        let response = self
            .client
            .post(self.url(path))
            .json(&json!({ "customerId": customer_id, "title": title }))
            .send()
            .await
            .map_err(|e| Self::request_failed(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::bad_status(path, status));
        }

        let envelope: CreateChatEnvelope = response.json().await.unwrap_or_default();
        envelope.chat_id.ok_or_else(|| {
            DispatchError::PersistenceError("Chat API created a chat without an id".to_string())
        })
    }

    async fn append_messages(
        &self,
        chat_id: &str,
        customer_id: &str,
        messages: &[StoredMessage],
    ) -> Result<()> {
        let path = "/api/Chat/AddMessages";
        let body = AppendMessagesBody {
            chat_id,
            customer_id,
            messages,
        };
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::request_failed(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::bad_status(path, status));
        }
        Ok(())
    }

    async fn chat_detail(&self, chat_id: &str) -> Result<ChatDetail> {
        let path = format!("/api/Chat/{}", chat_id);
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(|e| Self::request_failed(&path, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(ChatDetail::default());
        }
        if !status.is_success() {
            return Err(Self::bad_status(&path, status));
        }

        let envelope: ChatDetailEnvelope = response.json().await.map_err(|e| {
            DispatchError::PersistenceError(format!("Invalid JSON from {}: {}", path, e))
        })?;
        Ok(envelope.chat)
    }

    async fn set_summary(&self, chat_id: &str, summary: &str) -> Result<()> {
        let path = "/api/Chat/SetChatSummary";
        let response = self
            .client
            .post(self.url(path))
            .json(&json!({ "chatId": chat_id, "summary": summary }))
            .send()
            .await
            .map_err(|e| Self::request_failed(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::bad_status(path, status));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredChat {
    customer_id: String,
    record: ChatRecord,
    detail: ChatDetail,
}

/// In-memory chat backend for the demo binary and tests.
pub struct InMemoryChatStore {
    chats: Arc<RwLock<HashMap<String, StoredChat>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a conversation with an explicit record and detail, e.g. a
    /// backdated chat.
    pub async fn insert_chat(&self, customer_id: &str, record: ChatRecord, detail: ChatDetail) {
        let chat_id = record.chat_id.clone();
        let stored = StoredChat {
            customer_id: customer_id.to_string(),
            record,
            detail,
        };
        self.chats.write().await.insert(chat_id, stored);
    }
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn chats_for_customer(&self, customer_id: &str) -> Result<Vec<ChatRecord>> {
        let chats = self.chats.read().await;
        Ok(chats
            .values()
            .filter(|c| c.customer_id == customer_id)
            .map(|c| c.record.clone())
            .collect())
    }

    async fn create_chat(&self, customer_id: &str, title: &str) -> Result<String> {
        let chat_id = Uuid::new_v4().to_string();
        let stored = StoredChat {
            customer_id: customer_id.to_string(),
            record: ChatRecord {
                chat_id: chat_id.clone(),
                created_at: Utc::now(),
                title: Some(title.to_string()),
            },
            detail: ChatDetail::default(),
        };
        self.chats.write().await.insert(chat_id.clone(), stored);
        Ok(chat_id)
    }

    async fn append_messages(
        &self,
        chat_id: &str,
        _customer_id: &str,
        messages: &[StoredMessage],
    ) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(chat_id).ok_or_else(|| {
            DispatchError::PersistenceError(format!("Unknown chat id {}", chat_id))
        })?;
        chat.detail.messages.extend_from_slice(messages);
        Ok(())
    }

    async fn chat_detail(&self, chat_id: &str) -> Result<ChatDetail> {
        let chats = self.chats.read().await;
        Ok(chats
            .get(chat_id)
            .map(|c| c.detail.clone())
            .unwrap_or_default())
    }

    async fn set_summary(&self, chat_id: &str, summary: &str) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(chat_id).ok_or_else(|| {
            DispatchError::PersistenceError(format!("Unknown chat id {}", chat_id))
        })?;
        chat.detail.summary = Some(summary.to_string());
        Ok(())
    }
}

/// What a transcript save actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Transcript already persisted in full; no request sent.
    Unchanged,
    /// This many messages were appended.
    Appended(usize),
}

/// Dedup wrapper over a [`ChatStore`].
pub struct ChatGateway {
    store: Arc<dyn ChatStore>,
}

impl ChatGateway {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Conversations for a customer, newest first.
    pub async fn list_chats(&self, customer_id: &str) -> Result<Vec<ChatRecord>> {
        let mut chats = self.store.chats_for_customer(customer_id).await?;
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    pub async fn create_chat(&self, customer_id: &str, title: &str) -> Result<String> {
        self.store.create_chat(customer_id, title).await
    }

    pub async fn chat_detail(&self, chat_id: &str) -> Result<ChatDetail> {
        self.store.chat_detail(chat_id).await
    }

    pub async fn set_summary(&self, chat_id: &str, summary: &str) -> Result<()> {
        self.store.set_summary(chat_id, summary).await
    }

    /// Persist the session transcript idempotently. An unchanged
    /// transcript is skipped; a grown one appends only the new tail; a
    /// diverged one appends everything and lets the backend reconcile.
    pub async fn save_transcript(
        &self,
        chat_id: &str,
        customer_id: &str,
        transcript: &[StoredMessage],
    ) -> Result<SaveOutcome> {
        let existing = self.store.chat_detail(chat_id).await?.messages;

        let existing_norm = normalized(&existing);
        let incoming_norm = normalized(transcript);

        if existing_norm == incoming_norm {
            debug!(chat_id, "transcript unchanged, skipping save");
            return Ok(SaveOutcome::Unchanged);
        }

        let new_tail: &[StoredMessage] = if incoming_norm.len() > existing_norm.len()
            && incoming_norm[..existing_norm.len()] == existing_norm[..]
        {
            &transcript[existing_norm.len()..]
        } else {
            warn!(
                chat_id,
                persisted = existing_norm.len(),
                incoming = incoming_norm.len(),
                "transcript diverged from persisted copy, saving full transcript"
            );
            transcript
        };

        if new_tail.is_empty() {
            return Ok(SaveOutcome::Unchanged);
        }

        self.store
            .append_messages(chat_id, customer_id, new_tail)
            .await?;
        Ok(SaveOutcome::Appended(new_tail.len()))
    }
}

/// Sender lowercased and both fields trimmed, the comparison key the
/// original service used for save idempotence.
fn normalized(messages: &[StoredMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .map(|m| {
            (
                m.sender.trim().to_lowercase(),
                m.message.trim().to_string(),
            )
        })
        .collect()
}
