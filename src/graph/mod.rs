//! Dispatch graph - the per-turn routing state machine
//!
//! ENTRY → WELCOME/VALIDATE | SUPERVISOR → <handler> → SUPERVISOR → TERMINAL
//!
//! One node is active at a time. The supervisor selects at most one
//! handler per turn; a handler always returns control through the
//! supervisor, never to another handler. Unvalidated sessions are
//! gated through the welcome node until validation succeeds or the
//! retry budget runs out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::{Intent, IntentClassifier};
use crate::error::DispatchError;
use crate::handlers::validation::MSG_VALIDATION_EXHAUSTED;
use crate::handlers::{HandlerKind, HandlerRegistry};
use crate::session::{SessionState, StatementArtifact, TurnRole};
use crate::Result;

/// Hard cap on node activations per turn. The longest legal path is
/// five nodes; anything past this is a routing bug.
const MAX_STEPS_PER_TURN: u32 = 8;

pub const MSG_SUPERVISOR_MENU: &str = "I can help you update your account details, fetch your loan statement, manage your loan, answer questions about our policies, or summarize your recent activity. How can I help you today?";
pub const MSG_HANDLER_FAILURE: &str =
    "Something went wrong while handling your request. Please try again.";

/// Nodes of the routing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphNode {
    Entry,
    Welcome,
    Supervisor,
    Handler(HandlerKind),
    Terminal,
}

impl GraphNode {
    fn name(&self) -> &'static str {
        match self {
            GraphNode::Entry => "entry",
            GraphNode::Welcome => "welcome",
            GraphNode::Supervisor => "supervisor",
            GraphNode::Handler(kind) => kind.name(),
            GraphNode::Terminal => "terminal",
        }
    }
}

/// What one turn through the graph produced.
#[derive(Debug)]
pub struct TurnReply {
    pub message: String,
    pub artifact: Option<StatementArtifact>,
    /// Handler that ran this turn, if any.
    pub activated: Option<HandlerKind>,
    /// Node names visited, in order.
    pub trace: Vec<String>,
}

pub struct DispatchGraph {
    registry: HandlerRegistry,
    classifier: Arc<dyn IntentClassifier>,
}

impl DispatchGraph {
    pub fn new(registry: HandlerRegistry, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            registry,
            classifier,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Route one user turn. The caller records the user input in the
    /// session history; the graph records handler activations.
    pub async fn run_turn(&self, session: &mut SessionState, input: &str) -> Result<TurnReply> {
        let mut trace = Vec::new();
        let mut steps = 0u32;
        let mut node = GraphNode::Entry;
        let mut message: Option<String> = None;
        let mut artifact: Option<StatementArtifact> = None;
        let mut activated: Option<HandlerKind> = None;

        loop {
            steps += 1;
            if steps > MAX_STEPS_PER_TURN {
                return Err(DispatchError::GraphError(format!(
                    "turn exceeded {} graph steps: {}",
                    MAX_STEPS_PER_TURN,
                    trace.join(" -> ")
                )));
            }
            trace.push(node.name().to_string());
            debug!(node = node.name(), step = steps, "graph step");

            node = match node {
                GraphNode::Entry => {
                    if session.is_validated() {
                        GraphNode::Supervisor
                    } else {
                        GraphNode::Welcome
                    }
                }

                GraphNode::Welcome => {
                    if session.validation_exhausted() {
                        // Permanently failed: no further attempts are
                        // dispatched, regardless of input.
                        message = Some(MSG_VALIDATION_EXHAUSTED.to_string());
                        GraphNode::Terminal
                    } else {
                        let outcome = self
                            .dispatch(HandlerKind::Validation, session, input)
                            .await?;
                        message = Some(outcome.message);
                        artifact = outcome.artifact;
                        activated = Some(HandlerKind::Validation);
                        if session.is_validated() {
                            GraphNode::Supervisor
                        } else {
                            // Self-loop: the turn ends, the next turn
                            // re-enters the welcome node.
                            GraphNode::Terminal
                        }
                    }
                }

                GraphNode::Supervisor => {
                    if activated.is_some() {
                        // The one allowed handoff already happened;
                        // no further work this turn.
                        GraphNode::Terminal
                    } else {
                        let available = self.registry.available_intents();
                        let intent = self.classifier.classify(input, &available).await;
                        match HandlerKind::for_intent(intent) {
                            Some(kind) if self.registry.get(kind).is_some() => {
                                GraphNode::Handler(kind)
                            }
                            Some(kind) => {
                                warn!(handler = kind.name(), "intent routed to unregistered handler");
                                message = Some(MSG_SUPERVISOR_MENU.to_string());
                                GraphNode::Terminal
                            }
                            None => {
                                message = Some(MSG_SUPERVISOR_MENU.to_string());
                                GraphNode::Terminal
                            }
                        }
                    }
                }

                GraphNode::Handler(kind) => {
                    let outcome = self.dispatch(kind, session, input).await?;
                    message = Some(outcome.message);
                    artifact = outcome.artifact;
                    activated = Some(kind);
                    GraphNode::Supervisor
                }

                GraphNode::Terminal => break,
            };
        }

        info!(
            session_id = %session.session_id,
            activated = activated.map(|k| k.name()).unwrap_or("none"),
            steps,
            "turn complete"
        );

        Ok(TurnReply {
            message: message.unwrap_or_else(|| MSG_SUPERVISOR_MENU.to_string()),
            artifact,
            activated,
            trace,
        })
    }

    /// Run one handler, fold its delta into the session, and record
    /// the activation as a tool turn. A handler error becomes a
    /// user-visible failure message; the graph always completes.
    async fn dispatch(
        &self,
        kind: HandlerKind,
        session: &mut SessionState,
        input: &str,
    ) -> Result<DispatchStep> {
        let handler = self
            .registry
            .get(kind)
            .ok_or_else(|| DispatchError::HandlerNotFound(kind.name().to_string()))?;

        info!(handler = kind.name(), "dispatching handler");
        match handler.handle(session, input).await {
            Ok(outcome) => {
                session.apply(outcome.delta);
                session.push_turn(TurnRole::Tool, kind.name());
                Ok(DispatchStep {
                    message: outcome.reply,
                    artifact: outcome.artifact,
                })
            }
            Err(e) => {
                warn!(handler = kind.name(), "handler failed: {}", e);
                session.push_turn(TurnRole::Tool, format!("{} failed", kind.name()));
                Ok(DispatchStep {
                    message: MSG_HANDLER_FAILURE.to_string(),
                    artifact: None,
                })
            }
        }
    }
}

struct DispatchStep {
    message: String,
    artifact: Option<StatementArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordIntentClassifier;
    use crate::handlers::Handler;
    use crate::models::Customer;
    use crate::session::{StateDelta, TurnOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    /// Counts activations and returns a canned outcome.
    struct CountingHandler {
        kind: HandlerKind,
        calls: Arc<AtomicUsize>,
        delta: fn() -> StateDelta,
        fail: bool,
    }

    impl CountingHandler {
        fn new(kind: HandlerKind, calls: Arc<AtomicUsize>) -> Self {
            Self {
                kind,
                calls,
                delta: || StateDelta::None,
                fail: false,
            }
        }

        fn with_delta(mut self, delta: fn() -> StateDelta) -> Self {
            self.delta = delta;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl Handler for CountingHandler {
        fn kind(&self) -> HandlerKind {
            self.kind
        }

        fn description(&self) -> &'static str {
            "counts activations"
        }

        async fn handle(&self, _session: &SessionState, _input: &str) -> Result<TurnOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DispatchError::BackendError("boom".to_string()));
            }
            Ok(TurnOutcome::with_delta("done", (self.delta)()))
        }
    }

    fn graph_with(handlers: Vec<CountingHandler>) -> DispatchGraph {
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(Arc::new(handler));
        }
        DispatchGraph::new(registry, Arc::new(KeywordIntentClassifier))
    }

    fn validated_session() -> SessionState {
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });
        session
    }

    #[tokio::test]
    async fn test_unvalidated_session_routes_to_welcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![CountingHandler::new(
            HandlerKind::Validation,
            calls.clone(),
        )
        .with_delta(|| StateDelta::ValidationFailed)]);
        let mut session = SessionState::new(Uuid::new_v4(), 3);

        let reply = graph.run_turn(&mut session, "id 999999").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.activated, Some(HandlerKind::Validation));
        assert_eq!(session.retry_count(), 1);
        assert_eq!(reply.trace, vec!["entry", "welcome", "terminal"]);
    }

    #[tokio::test]
    async fn test_successful_validation_returns_through_supervisor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![CountingHandler::new(
            HandlerKind::Validation,
            calls.clone(),
        )
        .with_delta(|| StateDelta::Validated {
            customer: Customer {
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
            },
        })]);
        let mut session = SessionState::new(Uuid::new_v4(), 3);

        let reply = graph.run_turn(&mut session, "id 565343").await.unwrap();
        assert!(session.is_validated());
        assert_eq!(
            reply.trace,
            vec!["entry", "welcome", "supervisor", "terminal"]
        );
        // The welcome activation is the turn's single handoff.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_session_terminates_without_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![CountingHandler::new(
            HandlerKind::Validation,
            calls.clone(),
        )]);
        let mut session = SessionState::new(Uuid::new_v4(), 2);
        session.apply(StateDelta::ValidationFailed);
        session.apply(StateDelta::ValidationFailed);
        assert!(session.validation_exhausted());

        let reply = graph.run_turn(&mut session, "id 565343").await.unwrap();
        assert_eq!(reply.message, MSG_VALIDATION_EXHAUSTED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(reply.activated, None);
        assert_eq!(reply.trace, vec!["entry", "welcome", "terminal"]);
    }

    #[tokio::test]
    async fn test_single_handoff_per_turn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![CountingHandler::new(
            HandlerKind::LoanStatement,
            calls.clone(),
        )]);
        let mut session = validated_session();

        let reply = graph
            .run_turn(&mut session, "show me my loan statement")
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.activated, Some(HandlerKind::LoanStatement));
        assert_eq!(
            reply.trace,
            vec!["entry", "supervisor", "loan_statement", "supervisor", "terminal"]
        );
    }

    #[tokio::test]
    async fn test_general_intent_gets_supervisor_reply() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![CountingHandler::new(
            HandlerKind::LoanStatement,
            calls.clone(),
        )]);
        let mut session = validated_session();

        let reply = graph.run_turn(&mut session, "thanks!").await.unwrap();
        assert_eq!(reply.message, MSG_SUPERVISOR_MENU);
        assert_eq!(reply.activated, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_degrades_to_failure_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = graph_with(vec![
            CountingHandler::new(HandlerKind::LoanStatement, calls.clone()).failing(),
        ]);
        let mut session = validated_session();

        let reply = graph
            .run_turn(&mut session, "show me my loan statement")
            .await
            .unwrap();
        assert_eq!(reply.message, MSG_HANDLER_FAILURE);
        assert_eq!(reply.activated, Some(HandlerKind::LoanStatement));
        // The failure is still recorded in the session history.
        let last = session.history().messages().last().map(|m| m.content.clone());
        assert_eq!(last.as_deref(), Some("loan_statement failed"));
    }

    #[tokio::test]
    async fn test_empty_registry_falls_back_to_menu() {
        // No capability is available, so the classifier has nothing to
        // route to and the supervisor answers directly.
        let graph = graph_with(vec![]);
        let mut session = validated_session();

        let reply = graph
            .run_turn(&mut session, "show me my loan statement")
            .await
            .unwrap();
        assert_eq!(reply.message, MSG_SUPERVISOR_MENU);
        assert_eq!(reply.activated, None);
    }
}
