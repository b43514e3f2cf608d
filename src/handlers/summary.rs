//! Weekly activity digest
//!
//! Summarizes the customer's conversations from the last seven days.
//! Summaries are cached in memory and written back to the chat backend
//! so each conversation is summarized at most once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::chat::ChatGateway;
use crate::llm::CompletionClient;
use crate::models::StoredMessage;
use crate::session::{SessionState, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub const SUMMARY_WINDOW_DAYS: i64 = 7;
pub const MSG_NOT_VALIDATED: &str =
    "Please validate your account before requesting an activity summary.";
pub const MSG_NO_RECENT_ACTIVITY: &str =
    "You have no conversations from the last 7 days.";
pub const MSG_SUMMARY_UNAVAILABLE: &str = "Summary unavailable for this conversation.";

const SUMMARY_PROMPT: &str = "Create a detailed summary of the conversation below.";

/// One conversation in the digest.
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub chat_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub summary: String,
}

/// Read-through summary cache over the chat backend. A summary already
/// stored on the chat wins; otherwise one is generated and written
/// back. Generation failures are reported but never cached.
pub struct SummaryCache {
    chats: Arc<ChatGateway>,
    llm: Arc<dyn CompletionClient>,
    cache: RwLock<HashMap<String, String>>,
}

impl SummaryCache {
    pub fn new(chats: Arc<ChatGateway>, llm: Arc<dyn CompletionClient>) -> Self {
        Self {
            chats,
            llm,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Digest of every conversation inside the summary window, newest
    /// first. The chat listing is newest-first, so the scan stops at
    /// the first conversation older than the cutoff.
    pub async fn weekly_digest(&self, customer_id: &str) -> Result<Vec<DigestEntry>> {
        let cutoff = Utc::now() - Duration::days(SUMMARY_WINDOW_DAYS);
        let mut entries = Vec::new();

        for record in self.chats.list_chats(customer_id).await? {
            if record.created_at < cutoff {
                break;
            }
            let summary = self.summary_for(&record.chat_id).await;
            entries.push(DigestEntry {
                title: record.display_title(),
                created_at: record.created_at,
                chat_id: record.chat_id,
                summary,
            });
        }

        Ok(entries)
    }

    async fn summary_for(&self, chat_id: &str) -> String {
        if let Some(cached) = self.cache.read().await.get(chat_id) {
            debug!("summary cache hit for chat {}", chat_id);
            return cached.clone();
        }

        let detail = match self.chats.chat_detail(chat_id).await {
            Ok(d) => d,
            Err(e) => {
                warn!("chat detail fetch failed for {}: {}", chat_id, e);
                return MSG_SUMMARY_UNAVAILABLE.to_string();
            }
        };

        if let Some(stored) = detail.summary.filter(|s| !s.trim().is_empty()) {
            self.cache
                .write()
                .await
                .insert(chat_id.to_string(), stored.clone());
            return stored;
        }

        let transcript = render_transcript(&detail.messages);
        if transcript.is_empty() {
            return MSG_SUMMARY_UNAVAILABLE.to_string();
        }

        match self.llm.complete(SUMMARY_PROMPT, &transcript).await {
            Ok(summary) => {
                if let Err(e) = self.chats.set_summary(chat_id, &summary).await {
                    warn!("summary write-back failed for {}: {}", chat_id, e);
                }
                self.cache
                    .write()
                    .await
                    .insert(chat_id.to_string(), summary.clone());
                summary
            }
            Err(e) => {
                warn!("summary generation failed for {}: {}", chat_id, e);
                MSG_SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }
}

fn render_transcript(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.sender, m.message))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ActivitySummaryHandler {
    cache: Arc<SummaryCache>,
}

impl ActivitySummaryHandler {
    pub fn new(cache: SummaryCache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }
}

#[async_trait::async_trait]
impl Handler for ActivitySummaryHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ActivitySummary
    }

    fn description(&self) -> &'static str {
        "Summarize the customer's conversations from the last 7 days"
    }

    async fn handle(&self, session: &SessionState, _input: &str) -> Result<TurnOutcome> {
        let customer = match session.customer() {
            Some(c) => c,
            None => return Ok(TurnOutcome::reply(MSG_NOT_VALIDATED)),
        };

        let entries = self.cache.weekly_digest(&customer.customer_id).await?;
        if entries.is_empty() {
            return Ok(TurnOutcome::reply(MSG_NO_RECENT_ACTIVITY));
        }

        let mut reply = format!(
            "Here is your activity from the last {} days:\n",
            SUMMARY_WINDOW_DAYS
        );
        for entry in &entries {
            reply.push_str(&format!(
                "\n**{}** ({})\n{}\n",
                entry.title,
                entry.created_at.format("%Y-%m-%d %H:%M"),
                entry.summary
            ));
        }
        Ok(TurnOutcome::reply(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::InMemoryChatStore;
    use crate::llm::MockCompletionClient;
    use crate::models::{ChatDetail, ChatRecord, Customer};
    use crate::session::StateDelta;
    use uuid::Uuid;

    fn customer() -> Customer {
        Customer {
            customer_id: "565343".to_string(),
            customer_name: "Juan Mathew".to_string(),
            email_address: None,
            payment_method: None,
            created_on: None,
            next_payment: None,
            final_payment: None,
            address: None,
            phone_info: None,
            payment_reminder: false,
            notes: Vec::new(),
        }
    }

    fn validated_session() -> SessionState {
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });
        session
    }

    fn message(sender: &str, text: &str) -> StoredMessage {
        StoredMessage {
            sender: sender.to_string(),
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_digest_only_covers_the_window() {
        let store = InMemoryChatStore::new();
        store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "recent".to_string(),
                    created_at: Utc::now() - Duration::days(2),
                    title: Some("EMI questions".to_string()),
                },
                ChatDetail {
                    messages: vec![message("user", "what is my emi")],
                    summary: Some("Asked about the EMI.".to_string()),
                },
            )
            .await;
        store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "stale".to_string(),
                    created_at: Utc::now() - Duration::days(30),
                    title: Some("Old chat".to_string()),
                },
                ChatDetail {
                    messages: vec![message("user", "hello")],
                    summary: Some("Greeted.".to_string()),
                },
            )
            .await;

        let gateway = Arc::new(ChatGateway::new(Arc::new(store)));
        let cache = SummaryCache::new(gateway, Arc::new(MockCompletionClient::new("unused")));

        let digest = cache.weekly_digest("565343").await.unwrap();
        assert_eq!(digest.len(), 1);
        assert_eq!(digest[0].chat_id, "recent");
        assert_eq!(digest[0].summary, "Asked about the EMI.");
    }

    #[tokio::test]
    async fn test_missing_summary_is_generated_and_written_back() {
        let store = Arc::new(InMemoryChatStore::new());
        store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "c1".to_string(),
                    created_at: Utc::now(),
                    title: None,
                },
                ChatDetail {
                    messages: vec![
                        message("user", "show my statement"),
                        message("assistant", "Here is your loan statement"),
                    ],
                    summary: None,
                },
            )
            .await;

        let gateway = Arc::new(ChatGateway::new(store.clone()));
        let cache = SummaryCache::new(
            gateway.clone(),
            Arc::new(MockCompletionClient::new("Requested a loan statement.")),
        );

        let digest = cache.weekly_digest("565343").await.unwrap();
        assert_eq!(digest[0].summary, "Requested a loan statement.");

        // Written back to the chat backend.
        let detail = gateway.chat_detail("c1").await.unwrap();
        assert_eq!(detail.summary.as_deref(), Some("Requested a loan statement."));
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported_not_cached() {
        let store = Arc::new(InMemoryChatStore::new());
        store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "c1".to_string(),
                    created_at: Utc::now(),
                    title: None,
                },
                ChatDetail {
                    messages: vec![message("user", "hello")],
                    summary: None,
                },
            )
            .await;

        let gateway = Arc::new(ChatGateway::new(store.clone()));
        let cache = SummaryCache::new(gateway.clone(), Arc::new(MockCompletionClient::failing()));

        let digest = cache.weekly_digest("565343").await.unwrap();
        assert_eq!(digest[0].summary, MSG_SUMMARY_UNAVAILABLE);
        assert!(cache.cache.read().await.is_empty());

        let detail = gateway.chat_detail("c1").await.unwrap();
        assert!(detail.summary.is_none());
    }

    #[tokio::test]
    async fn test_handler_formats_digest() {
        let store = InMemoryChatStore::new();
        let created = Utc::now() - Duration::days(1);
        store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "c1".to_string(),
                    created_at: created,
                    title: Some("Payment reminder change".to_string()),
                },
                ChatDetail {
                    messages: vec![message("user", "turn off reminders")],
                    summary: Some("Disabled payment reminders.".to_string()),
                },
            )
            .await;

        let gateway = Arc::new(ChatGateway::new(Arc::new(store)));
        let cache = SummaryCache::new(gateway, Arc::new(MockCompletionClient::new("unused")));
        let handler = ActivitySummaryHandler::new(cache);

        let outcome = handler
            .handle(&validated_session(), "what did I do this week")
            .await
            .unwrap();
        assert!(outcome.reply.contains("**Payment reminder change**"));
        assert!(outcome.reply.contains("Disabled payment reminders."));
    }

    #[tokio::test]
    async fn test_no_recent_activity() {
        let store = InMemoryChatStore::new();
        let gateway = Arc::new(ChatGateway::new(Arc::new(store)));
        let cache = SummaryCache::new(gateway, Arc::new(MockCompletionClient::new("unused")));
        let handler = ActivitySummaryHandler::new(cache);

        let outcome = handler
            .handle(&validated_session(), "summarize my week")
            .await
            .unwrap();
        assert_eq!(outcome.reply, MSG_NO_RECENT_ACTIVITY);
    }

    #[tokio::test]
    async fn test_requires_validation() {
        let store = InMemoryChatStore::new();
        let gateway = Arc::new(ChatGateway::new(Arc::new(store)));
        let cache = SummaryCache::new(gateway, Arc::new(MockCompletionClient::new("unused")));
        let handler = ActivitySummaryHandler::new(cache);

        let session = SessionState::new(Uuid::new_v4(), 3);
        let outcome = handler.handle(&session, "my week").await.unwrap();
        assert_eq!(outcome.reply, MSG_NOT_VALIDATED);
    }
}
