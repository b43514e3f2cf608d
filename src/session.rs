//! Per-session conversation state
//!
//! Holds the turn history, the validated customer (if any), the retry
//! counter for the validation gate, and the active chat id. Mutation of
//! the gated fields goes through [`StateDelta`] so the invariant "a
//! customer is only ever attached to a confirmed session" holds by
//! construction. Turn-scoped data (the statement artifact) travels by
//! value inside [`TurnOutcome`] and is consumed by move, never flagged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::loan::AmortizedPayment;
use crate::models::{Customer, LoanStatement, StoredMessage};

/// Default number of validation attempts before the session is escalated.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Role of a turn in the session history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

/// A single turn in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: TurnRole,
    pub content: String,
}

impl TurnMessage {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Ordered turn history for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionHistory {
    messages: VecDeque<TurnMessage>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: TurnRole, content: impl Into<String>) {
        self.messages.push_back(TurnMessage::new(role, content));
    }

    pub fn messages(&self) -> impl Iterator<Item = &TurnMessage> {
        self.messages.iter()
    }

    /// Iterate over the N most recent turns, newest first.
    pub fn recent(&self, count: usize) -> impl DoubleEndedIterator<Item = &TurnMessage> {
        self.messages.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == TurnRole::User)
            .map(|m| m.content.as_str())
    }

    /// Plain "role: content" rendering for LLM prompts.
    pub fn formatted_transcript(&self) -> String {
        let mut out = String::new();
        for msg in &self.messages {
            out.push_str(msg.role.as_str());
            out.push_str(": ");
            out.push_str(&msg.content);
            out.push('\n');
        }
        out
    }

    /// User/assistant turns in the chat backend's wire shape. Tool
    /// turns stay local to the session.
    pub fn as_stored_messages(&self) -> Vec<StoredMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != TurnRole::Tool)
            .map(|m| StoredMessage {
                sender: m.role.as_str().to_string(),
                message: m.content.clone(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Tri-state validation gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// No validation attempt made yet.
    Unknown,
    /// Customer identity confirmed against the servicing backend.
    Confirmed,
    /// Last attempt failed; retries may remain.
    Failed,
}

/// State mutation produced by a handler, applied when control returns
/// to the graph. The only variant that can attach a customer also
/// confirms the session.
#[derive(Debug, Clone)]
pub enum StateDelta {
    None,
    Validated { customer: Customer },
    ValidationFailed,
    /// Backend accepted an account update and returned the new record.
    CustomerReplaced { customer: Customer },
}

/// Structured loan statement handed out alongside the rendered reply.
/// Deliberately not `Clone`: the controller moves it out of the turn
/// exactly once.
#[derive(Debug, Serialize)]
pub struct StatementArtifact {
    pub statement: LoanStatement,
    pub schedule: Vec<AmortizedPayment>,
}

/// What a handler hands back to the graph for one turn
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub delta: StateDelta,
    pub artifact: Option<StatementArtifact>,
}

impl TurnOutcome {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            delta: StateDelta::None,
            artifact: None,
        }
    }

    pub fn with_delta(text: impl Into<String>, delta: StateDelta) -> Self {
        Self {
            reply: text.into(),
            delta,
            artifact: None,
        }
    }

    pub fn with_artifact(text: impl Into<String>, artifact: StatementArtifact) -> Self {
        Self {
            reply: text.into(),
            delta: StateDelta::None,
            artifact: Some(artifact),
        }
    }
}

/// Conversation state for one session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    history: SessionHistory,
    customer: Option<Customer>,
    validation: ValidationStatus,
    retry_count: u32,
    retry_limit: u32,
    pub active_conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: Uuid, retry_limit: u32) -> Self {
        Self {
            session_id,
            history: SessionHistory::new(),
            customer: None,
            validation: ValidationStatus::Unknown,
            retry_count: 0,
            retry_limit: retry_limit.max(1),
            active_conversation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn push_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.history.push(role, content);
        self.updated_at = Utc::now();
    }

    /// Replace the whole history, used when the session switches to a
    /// different stored conversation.
    pub fn reset_history(&mut self, history: SessionHistory) {
        self.history = history;
        self.updated_at = Utc::now();
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn validation(&self) -> ValidationStatus {
        self.validation
    }

    pub fn is_validated(&self) -> bool {
        self.validation == ValidationStatus::Confirmed
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Canonical terminal condition for the validation gate.
    pub fn validation_exhausted(&self) -> bool {
        !self.is_validated() && self.retry_count >= self.retry_limit
    }

    /// Fold a handler's delta into the session. Counter saturates at
    /// the limit; a customer replacement on an unconfirmed session is
    /// dropped rather than breaking the confirmation invariant.
    pub fn apply(&mut self, delta: StateDelta) {
        match delta {
            StateDelta::None => {}
            StateDelta::Validated { customer } => {
                self.validation = ValidationStatus::Confirmed;
                self.customer = Some(customer);
            }
            StateDelta::ValidationFailed => {
                self.validation = ValidationStatus::Failed;
                self.retry_count = (self.retry_count + 1).min(self.retry_limit);
            }
            StateDelta::CustomerReplaced { customer } => {
                if self.validation == ValidationStatus::Confirmed {
                    self.customer = Some(customer);
                } else {
                    tracing::warn!(
                        session_id = %self.session_id,
                        "dropping customer replacement on unconfirmed session"
                    );
                }
            }
        }
        self.updated_at = Utc::now();
    }
}
