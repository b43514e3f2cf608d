//! Concorde Finances Loan Support Orchestrator
//!
//! A conversational loan-servicing assistant that:
//! - Gates every session behind customer validation with a bounded retry budget
//! - Routes each turn through a supervisor to at most one specialist handler
//! - Serves statements, restructuring what-ifs, and account updates over REST collaborators
//! - Answers policy questions strictly from retrieved documents
//! - Persists transcripts idempotently and summarizes recent activity
//!
//! TURN PIPELINE:
//! USER INPUT → ENTRY → WELCOME/VALIDATE | SUPERVISOR → HANDLER → SUPERVISOR → TERMINAL → REPLY

pub mod agent;
pub mod api;
pub mod backend;
pub mod chat;
pub mod classifier;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod llm;
pub mod loan;
pub mod models;
pub mod retrieval;
pub mod session;

pub use error::{DispatchError, Result};

// Re-export common types
pub use models::*;
pub use classifier::{Intent, IntentClassifier};
