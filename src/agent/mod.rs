//! Turn controller - owns the sessions and drives the dispatch graph
//!
//! One turn: record the user message, walk the graph, record the
//! assistant reply, then persist the transcript best-effort. Turns on
//! the same session are serialized; distinct sessions proceed
//! independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::ChatGateway;
use crate::graph::DispatchGraph;
use crate::llm::CompletionClient;
use crate::session::{
    SessionHistory, SessionState, StatementArtifact, TurnRole, DEFAULT_RETRY_LIMIT,
};
use crate::Result;

const TITLE_PROMPT: &str =
    "Create a short title of at most five words for the conversation below. Reply with the title only.";
const TITLE_MAX_CHARS: usize = 60;

/// Everything the API layer needs from one processed turn.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub session_id: Uuid,
    /// Conversation the transcript was persisted to, once one exists.
    pub chat_id: Option<String>,
    pub reply: String,
    /// Name of the handler that ran, if any.
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<StatementArtifact>,
}

pub struct TurnController {
    graph: DispatchGraph,
    chats: Arc<ChatGateway>,
    llm: Arc<dyn CompletionClient>,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionState>>>>,
    retry_limit: u32,
}

impl TurnController {
    pub fn new(
        graph: DispatchGraph,
        chats: Arc<ChatGateway>,
        llm: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            graph,
            chats,
            llm,
            sessions: RwLock::new(HashMap::new()),
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Process one user turn against a session, creating the session
    /// on first contact. `chat_id` selects an existing conversation;
    /// without it the controller keeps (or creates) the active one.
    pub async fn process_turn(
        &self,
        session_id: Uuid,
        chat_id: Option<&str>,
        input: &str,
    ) -> Result<TurnResponse> {
        let session = self.session(session_id).await;
        let mut state = session.lock().await;

        if let Some(requested) = chat_id {
            if state.active_conversation_id.as_deref() != Some(requested) {
                self.switch_conversation(&mut state, requested).await;
            }
        }

        state.push_turn(TurnRole::User, input);
        let reply = self.graph.run_turn(&mut state, input).await?;
        state.push_turn(TurnRole::Assistant, reply.message.clone());

        let chat_ref = self.persist(&mut state).await;

        Ok(TurnResponse {
            session_id,
            chat_id: chat_ref,
            reply: reply.message,
            handler: reply.activated.map(|k| k.name().to_string()),
            statement: reply.artifact,
        })
    }

    async fn session(&self, session_id: Uuid) -> Arc<Mutex<SessionState>> {
        if let Some(existing) = self.sessions.read().await.get(&session_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id)
            .or_insert_with(|| {
                debug!(session_id = %session_id, "creating session");
                Arc::new(Mutex::new(SessionState::new(session_id, self.retry_limit)))
            })
            .clone()
    }

    /// Replace the session history with a stored conversation. A load
    /// failure keeps the current history; the turn still proceeds.
    async fn switch_conversation(&self, state: &mut SessionState, chat_id: &str) {
        match self.chats.chat_detail(chat_id).await {
            Ok(detail) => {
                let mut history = SessionHistory::new();
                for message in &detail.messages {
                    let role = if message.sender.trim().eq_ignore_ascii_case("assistant") {
                        TurnRole::Assistant
                    } else {
                        TurnRole::User
                    };
                    history.push(role, message.message.clone());
                }
                info!(chat_id, turns = history.len(), "switched conversation");
                state.reset_history(history);
                state.active_conversation_id = Some(chat_id.to_string());
            }
            Err(e) => {
                warn!(chat_id, "conversation load failed: {}", e);
            }
        }
    }

    /// Best-effort transcript persistence. Nothing here can fail the
    /// turn; pre-validation turns stay in memory because the chat
    /// backend requires a customer id.
    async fn persist(&self, state: &mut SessionState) -> Option<String> {
        let customer_id = state.customer().map(|c| c.customer_id.clone())?;

        if state.active_conversation_id.is_none() {
            let title = self.conversation_title(state).await;
            match self.chats.create_chat(&customer_id, &title).await {
                Ok(chat_id) => {
                    info!(chat_id = %chat_id, title = %title, "created conversation");
                    state.active_conversation_id = Some(chat_id);
                }
                Err(e) => {
                    warn!("conversation create failed: {}", e);
                    return None;
                }
            }
        }

        let chat_id = state.active_conversation_id.clone()?;
        let transcript = state.history().as_stored_messages();
        match self
            .chats
            .save_transcript(&chat_id, &customer_id, &transcript)
            .await
        {
            Ok(outcome) => debug!(chat_id = %chat_id, ?outcome, "transcript saved"),
            Err(e) => warn!(chat_id = %chat_id, "transcript save failed: {}", e),
        }
        Some(chat_id)
    }

    async fn conversation_title(&self, state: &SessionState) -> String {
        let first_user = state
            .history()
            .messages()
            .find(|m| m.role == TurnRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        match self.llm.complete(TITLE_PROMPT, &first_user).await {
            Ok(title) => {
                let title: String = title.trim().trim_matches('"').chars().take(TITLE_MAX_CHARS).collect();
                if title.is_empty() {
                    fallback_title()
                } else {
                    title
                }
            }
            Err(e) => {
                debug!("title generation failed: {}", e);
                fallback_title()
            }
        }
    }
}

fn fallback_title() -> String {
    format!("Chat {}", Utc::now().format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockServicingBackend;
    use crate::chat::{ChatStore, InMemoryChatStore};
    use crate::classifier::KeywordIntentClassifier;
    use crate::handlers::create_default_registry;
    use crate::handlers::validation::{MSG_VALIDATION_EXHAUSTED, MSG_VALIDATION_FAILED};
    use crate::llm::MockCompletionClient;
    use crate::models::{ChatDetail, ChatRecord, Customer, LoanStatement, LoanSummary, PhoneInfo, StoredMessage};
    use crate::retrieval::StaticPassageRetriever;
    use chrono::NaiveDate;

    fn juan() -> Customer {
        Customer {
            customer_id: "565343".to_string(),
            customer_name: "Juan Mathew".to_string(),
            email_address: Some("juan@example.com".to_string()),
            payment_method: None,
            created_on: None,
            next_payment: None,
            final_payment: None,
            address: None,
            phone_info: Some(PhoneInfo {
                home_phone: Some("555-0142-7788".to_string()),
                work_phone: None,
            }),
            payment_reminder: true,
            notes: Vec::new(),
        }
    }

    fn statement() -> LoanStatement {
        LoanStatement {
            customer_id: "565343".to_string(),
            loan_account_number: None,
            loan_summary: LoanSummary {
                loan_amount: 500000.0,
                interest_rate: 7.5,
                tenure_months: 60,
                emi_amount: 10018.97,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                status: "Active".to_string(),
            },
            payment_history: Vec::new(),
        }
    }

    struct Fixture {
        controller: TurnController,
        store: Arc<InMemoryChatStore>,
    }

    async fn fixture_with(llm: MockCompletionClient) -> Fixture {
        let backend = Arc::new(MockServicingBackend::new());
        backend.insert_customer(juan()).await;
        backend.insert_statement(statement()).await;

        let store = Arc::new(InMemoryChatStore::new());
        let chats = Arc::new(ChatGateway::new(store.clone()));
        let llm: Arc<dyn CompletionClient> = Arc::new(llm);
        let retriever = Arc::new(StaticPassageRetriever::new());

        let registry =
            create_default_registry(backend, chats.clone(), llm.clone(), retriever);
        let graph = DispatchGraph::new(registry, Arc::new(KeywordIntentClassifier));
        let controller = TurnController::new(graph, chats, llm);

        Fixture { controller, store }
    }

    async fn fixture() -> Fixture {
        fixture_with(MockCompletionClient::new("Loan servicing questions")).await
    }

    #[tokio::test]
    async fn test_validate_then_statement_flow() {
        let fx = fixture().await;
        let session_id = Uuid::new_v4();

        let first = fx
            .controller
            .process_turn(session_id, None, "my customer id is 565343")
            .await
            .unwrap();
        assert!(first.reply.contains("successfully validated"));
        assert_eq!(first.handler.as_deref(), Some("validation"));
        let chat_id = first.chat_id.clone().expect("chat created after validation");

        let second = fx
            .controller
            .process_turn(session_id, None, "show me my loan statement")
            .await
            .unwrap();
        assert!(second.reply.contains("**Loan Summary**"));
        assert!(second.statement.is_some());
        assert_eq!(second.chat_id.as_deref(), Some(chat_id.as_str()));

        // Two turns, four stored messages, no duplicates.
        let detail = fx.store.chat_detail(&chat_id).await.unwrap();
        assert_eq!(detail.messages.len(), 4);
        assert_eq!(detail.messages[0].sender, "user");
        assert_eq!(detail.messages[1].sender, "assistant");
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_terminal() {
        let fx = fixture().await;
        let session_id = Uuid::new_v4();

        for expected_turns in 1..=2 {
            let response = fx
                .controller
                .process_turn(session_id, None, "my id is 111111")
                .await
                .unwrap();
            assert_eq!(response.reply, MSG_VALIDATION_FAILED, "turn {}", expected_turns);
        }

        let third = fx
            .controller
            .process_turn(session_id, None, "my id is 111111")
            .await
            .unwrap();
        assert_eq!(third.reply, MSG_VALIDATION_EXHAUSTED);

        // Past the limit even a valid id is no longer attempted.
        let fourth = fx
            .controller
            .process_turn(session_id, None, "my id is 565343")
            .await
            .unwrap();
        assert_eq!(fourth.reply, MSG_VALIDATION_EXHAUSTED);
        assert_eq!(fourth.handler, None);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let fx = fixture().await;
        let validated = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        fx.controller
            .process_turn(validated, None, "id 565343")
            .await
            .unwrap();

        let other = fx
            .controller
            .process_turn(fresh, None, "show me my loan statement")
            .await
            .unwrap();
        // The second session is still gated on validation.
        assert_eq!(other.handler.as_deref(), Some("validation"));
        assert_eq!(fx.controller.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_switching_appends_to_selected_conversation() {
        let fx = fixture().await;
        let session_id = Uuid::new_v4();

        fx.store
            .insert_chat(
                "565343",
                ChatRecord {
                    chat_id: "prior-chat".to_string(),
                    created_at: Utc::now(),
                    title: Some("Earlier today".to_string()),
                },
                ChatDetail {
                    messages: vec![
                        StoredMessage {
                            sender: "user".to_string(),
                            message: "hello".to_string(),
                        },
                        StoredMessage {
                            sender: "assistant".to_string(),
                            message: "Welcome to Concorde Finances!".to_string(),
                        },
                    ],
                    summary: None,
                },
            )
            .await;

        fx.controller
            .process_turn(session_id, None, "id 565343")
            .await
            .unwrap();

        let switched = fx
            .controller
            .process_turn(session_id, Some("prior-chat"), "what is my outstanding balance")
            .await
            .unwrap();
        assert_eq!(switched.chat_id.as_deref(), Some("prior-chat"));

        // The stored prefix is untouched; only this turn was appended.
        let detail = fx.store.chat_detail("prior-chat").await.unwrap();
        assert_eq!(detail.messages.len(), 4);
        assert_eq!(detail.messages[0].message, "hello");
        assert_eq!(
            detail.messages[2].message,
            "what is my outstanding balance"
        );
    }

    #[tokio::test]
    async fn test_title_falls_back_to_date_when_llm_fails() {
        let fx = fixture_with(MockCompletionClient::failing()).await;
        let session_id = Uuid::new_v4();

        let response = fx
            .controller
            .process_turn(session_id, None, "id 565343")
            .await
            .unwrap();
        let chat_id = response.chat_id.expect("chat created");

        let chats = fx.store.chats_for_customer("565343").await.unwrap();
        let record = chats.iter().find(|c| c.chat_id == chat_id).unwrap();
        assert!(record.title.as_deref().unwrap_or_default().starts_with("Chat "));
    }
}
