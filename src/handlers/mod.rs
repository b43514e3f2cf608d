//! Handler trait and registry
//!
//! One handler per support capability. The supervisor dispatches at
//! most one handler per turn; handlers talk to the collaborators and
//! hand a [`TurnOutcome`] back to the graph, never to each other.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::ServicingBackend;
use crate::chat::ChatGateway;
use crate::classifier::Intent;
use crate::llm::CompletionClient;
use crate::retrieval::{DocumentIndex, PassageRetriever, QueryDomain};
use crate::session::{SessionState, TurnOutcome};
use crate::Result;

pub mod management;
pub mod query;
pub mod statement;
pub mod summary;
pub mod update;
pub mod validation;

pub use management::LoanManagementHandler;
pub use query::DocumentQueryHandler;
pub use statement::LoanStatementHandler;
pub use summary::{ActivitySummaryHandler, SummaryCache};
pub use update::AccountUpdateHandler;
pub use validation::ValidationHandler;

/// The specialist capabilities a deployment can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Validation,
    AccountUpdate,
    LoanStatement,
    LoanManagement,
    ProfileQuery,
    PaymentsQuery,
    KycQuery,
    ActivitySummary,
}

impl HandlerKind {
    pub const ALL: &'static [HandlerKind] = &[
        HandlerKind::Validation,
        HandlerKind::AccountUpdate,
        HandlerKind::LoanStatement,
        HandlerKind::LoanManagement,
        HandlerKind::ProfileQuery,
        HandlerKind::PaymentsQuery,
        HandlerKind::KycQuery,
        HandlerKind::ActivitySummary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Validation => "validation",
            HandlerKind::AccountUpdate => "account_update",
            HandlerKind::LoanStatement => "loan_statement",
            HandlerKind::LoanManagement => "loan_management",
            HandlerKind::ProfileQuery => "profile_query",
            HandlerKind::PaymentsQuery => "payments_query",
            HandlerKind::KycQuery => "kyc_query",
            HandlerKind::ActivitySummary => "activity_summary",
        }
    }

    pub fn intent(&self) -> Intent {
        match self {
            HandlerKind::Validation => Intent::Validate,
            HandlerKind::AccountUpdate => Intent::UpdateAccount,
            HandlerKind::LoanStatement => Intent::LoanStatement,
            HandlerKind::LoanManagement => Intent::ManageLoan,
            HandlerKind::ProfileQuery => Intent::ProfileQuery,
            HandlerKind::PaymentsQuery => Intent::PaymentsQuery,
            HandlerKind::KycQuery => Intent::KycQuery,
            HandlerKind::ActivitySummary => Intent::ActivitySummary,
        }
    }

    pub fn for_intent(intent: Intent) -> Option<HandlerKind> {
        match intent {
            Intent::Validate => Some(HandlerKind::Validation),
            Intent::UpdateAccount => Some(HandlerKind::AccountUpdate),
            Intent::LoanStatement => Some(HandlerKind::LoanStatement),
            Intent::ManageLoan => Some(HandlerKind::LoanManagement),
            Intent::ProfileQuery => Some(HandlerKind::ProfileQuery),
            Intent::PaymentsQuery => Some(HandlerKind::PaymentsQuery),
            Intent::KycQuery => Some(HandlerKind::KycQuery),
            Intent::ActivitySummary => Some(HandlerKind::ActivitySummary),
            Intent::General => None,
        }
    }
}

/// Trait for a single specialist handler
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;
    fn description(&self) -> &'static str;
    async fn handle(&self, session: &SessionState, input: &str) -> Result<TurnOutcome>;
}

/// Handler registry for dispatch lookups
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<HandlerKind> {
        self.handlers.keys().copied().collect()
    }

    /// Intents the supervisor may route to, always including the
    /// general (no handoff) intent.
    pub fn available_intents(&self) -> Vec<Intent> {
        let mut intents: Vec<Intent> = self.handlers.keys().map(|k| k.intent()).collect();
        intents.push(Intent::General);
        intents
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the full production registry against the given collaborators.
pub fn create_default_registry(
    backend: Arc<dyn ServicingBackend>,
    chats: Arc<ChatGateway>,
    llm: Arc<dyn CompletionClient>,
    retriever: Arc<dyn PassageRetriever>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let index = Arc::new(DocumentIndex::new(retriever, llm.clone()));

    registry.register(Arc::new(ValidationHandler::new(backend.clone())));
    registry.register(Arc::new(AccountUpdateHandler::new(backend.clone())));
    registry.register(Arc::new(LoanStatementHandler::new(backend.clone())));
    registry.register(Arc::new(LoanManagementHandler::new(backend)));
    registry.register(Arc::new(DocumentQueryHandler::new(
        QueryDomain::Profile,
        index.clone(),
    )));
    registry.register(Arc::new(DocumentQueryHandler::new(
        QueryDomain::Payments,
        index.clone(),
    )));
    registry.register(Arc::new(DocumentQueryHandler::new(QueryDomain::Kyc, index)));
    registry.register(Arc::new(ActivitySummaryHandler::new(SummaryCache::new(
        chats, llm,
    ))));

    registry
}
