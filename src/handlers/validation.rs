//! Customer identity validation
//!
//! Looks up the candidate id against the servicing backend, optionally
//! with the last four digits of a phone number on file for stronger
//! verification. A prompt for credentials does not consume an attempt;
//! a failed lookup or an unreachable backend does.

use std::sync::Arc;
use tracing::warn;

use crate::backend::ServicingBackend;
use crate::session::{SessionState, StateDelta, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub const MSG_ASK_FOR_ID: &str =
    "Welcome to Concorde Finances! Please share your Customer ID so I can validate your account.";
pub const MSG_VALIDATION_FAILED: &str =
    "Validation failed. Please check your Customer ID and try again.";
pub const MSG_VALIDATION_EXHAUSTED: &str =
    "Maximum validation attempts reached. Please contact support.";
pub const MSG_BACKEND_UNAVAILABLE: &str =
    "I could not reach the servicing system to validate your account. Please try again in a moment.";

pub struct ValidationHandler {
    backend: Arc<dyn ServicingBackend>,
}

impl ValidationHandler {
    pub fn new(backend: Arc<dyn ServicingBackend>) -> Self {
        Self { backend }
    }
}

/// Credentials found in free text: the longest digit run is the id; a
/// second four-digit run, if any, is taken as the phone's last four.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    customer_id: String,
    phone_last4: Option<String>,
}

fn extract_credentials(input: &str) -> Option<Credentials> {
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs.retain(|r| r.len() >= 4);
    if runs.is_empty() {
        return None;
    }

    let longest = runs
        .iter()
        .enumerate()
        .max_by_key(|(i, r)| (r.len(), std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let customer_id = runs[longest].clone();
    let phone_last4 = runs
        .iter()
        .enumerate()
        .find(|(i, r)| *i != longest && r.len() == 4)
        .map(|(_, r)| r.clone());

    Some(Credentials {
        customer_id,
        phone_last4,
    })
}

#[async_trait::async_trait]
impl Handler for ValidationHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Validation
    }

    fn description(&self) -> &'static str {
        "Validate the customer's identity against the servicing backend"
    }

    async fn handle(&self, session: &SessionState, input: &str) -> Result<TurnOutcome> {
        let credentials = match extract_credentials(input) {
            Some(c) => c,
            None => return Ok(TurnOutcome::reply(MSG_ASK_FOR_ID)),
        };

        let lookup = match &credentials.phone_last4 {
            Some(last4) => {
                self.backend
                    .verify_customer(&credentials.customer_id, last4)
                    .await
            }
            None => self.backend.customer_by_id(&credentials.customer_id).await,
        };

        match lookup {
            Ok(Some(customer)) => {
                let reply = format!(
                    "The customer was successfully validated. Name: {} with CustomerId: {}",
                    customer.customer_name, customer.customer_id
                );
                Ok(TurnOutcome::with_delta(
                    reply,
                    StateDelta::Validated { customer },
                ))
            }
            Ok(None) => {
                // This failure is about to be counted against the
                // session, so the last allowed attempt escalates.
                let exhausting = session.retry_count() + 1 >= session.retry_limit();
                let reply = if exhausting {
                    MSG_VALIDATION_EXHAUSTED
                } else {
                    MSG_VALIDATION_FAILED
                };
                Ok(TurnOutcome::with_delta(reply, StateDelta::ValidationFailed))
            }
            Err(e) => {
                // An unreachable backend still consumes an attempt.
                warn!("validation lookup failed: {}", e);
                Ok(TurnOutcome::with_delta(
                    MSG_BACKEND_UNAVAILABLE,
                    StateDelta::ValidationFailed,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockServicingBackend;
    use crate::models::{Customer, PhoneInfo};
    use uuid::Uuid;

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

    async fn handler_with_juan() -> ValidationHandler {
        let backend = MockServicingBackend::new();
        backend.insert_customer(juan()).await;
        ValidationHandler::new(Arc::new(backend))
    }

    fn fresh_session() -> SessionState {
        SessionState::new(Uuid::new_v4(), 3)
    }

    #[test]
    fn test_credential_extraction() {
        assert_eq!(
            extract_credentials("my customer id is 565343"),
            Some(Credentials {
                customer_id: "565343".to_string(),
                phone_last4: None,
            })
        );
        assert_eq!(
            extract_credentials("id 565343, phone ending 7788"),
            Some(Credentials {
                customer_id: "565343".to_string(),
                phone_last4: Some("7788".to_string()),
            })
        );
        // Short runs like ages or counts are ignored.
        assert_eq!(extract_credentials("I am 25 and want to validate"), None);
        assert_eq!(extract_credentials("hello there"), None);
    }

    #[tokio::test]
    async fn test_successful_validation_attaches_customer() {
        let handler = handler_with_juan().await;
        let session = fresh_session();

        let outcome = handler
            .handle(&session, "please validate me, id 565343")
            .await
            .unwrap();
        assert_eq!(
            outcome.reply,
            "The customer was successfully validated. Name: Juan Mathew with CustomerId: 565343"
        );
        assert!(matches!(outcome.delta, StateDelta::Validated { .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_counts_as_failed_attempt() {
        let handler = handler_with_juan().await;
        let session = fresh_session();

        let outcome = handler.handle(&session, "my id is 111111").await.unwrap();
        assert_eq!(outcome.reply, MSG_VALIDATION_FAILED);
        assert!(matches!(outcome.delta, StateDelta::ValidationFailed));
    }

    #[tokio::test]
    async fn test_final_attempt_escalates() {
        let handler = handler_with_juan().await;
        let mut session = fresh_session();
        session.apply(StateDelta::ValidationFailed);
        session.apply(StateDelta::ValidationFailed);

        let outcome = handler.handle(&session, "try 222222").await.unwrap();
        assert_eq!(outcome.reply, MSG_VALIDATION_EXHAUSTED);
        assert!(matches!(outcome.delta, StateDelta::ValidationFailed));
    }

    #[tokio::test]
    async fn test_missing_id_prompts_without_consuming_attempt() {
        let handler = handler_with_juan().await;
        let session = fresh_session();

        let outcome = handler.handle(&session, "hi, I need help").await.unwrap();
        assert_eq!(outcome.reply, MSG_ASK_FOR_ID);
        assert!(matches!(outcome.delta, StateDelta::None));
    }

    #[tokio::test]
    async fn test_backend_error_consumes_attempt() {
        struct DownBackend;

        #[async_trait::async_trait]
        impl crate::backend::ServicingBackend for DownBackend {
            async fn customer_by_id(
                &self,
                _customer_id: &str,
            ) -> crate::Result<Option<Customer>> {
                Err(crate::DispatchError::BackendError("connection refused".into()))
            }

            async fn customer_exists(&self, _customer_id: &str) -> crate::Result<bool> {
                Err(crate::DispatchError::BackendError("connection refused".into()))
            }

            async fn verify_customer(
                &self,
                _customer_id: &str,
                _phone_last4: &str,
            ) -> crate::Result<Option<Customer>> {
                Err(crate::DispatchError::BackendError("connection refused".into()))
            }

            async fn update_account(
                &self,
                _customer_id: &str,
                _change: &crate::backend::AccountChange,
            ) -> crate::Result<crate::backend::BackendReply<Customer>> {
                Err(crate::DispatchError::BackendError("connection refused".into()))
            }

            async fn loan_statement(
                &self,
                _customer_id: &str,
            ) -> crate::Result<Option<crate::models::LoanStatement>> {
                Err(crate::DispatchError::BackendError("connection refused".into()))
            }
        }

        let handler = ValidationHandler::new(Arc::new(DownBackend));
        let session = fresh_session();

        let outcome = handler.handle(&session, "my id is 565343").await.unwrap();
        assert_eq!(outcome.reply, MSG_BACKEND_UNAVAILABLE);
        assert!(matches!(outcome.delta, StateDelta::ValidationFailed));
    }

    #[tokio::test]
    async fn test_phone_verification_path() {
        let handler = handler_with_juan().await;
        let session = fresh_session();

        let ok = handler
            .handle(&session, "id 565343, phone ending 7788")
            .await
            .unwrap();
        assert!(matches!(ok.delta, StateDelta::Validated { .. }));

        let bad = handler
            .handle(&session, "id 565343, phone ending 0000")
            .await
            .unwrap();
        assert_eq!(bad.reply, MSG_VALIDATION_FAILED);
        assert!(matches!(bad.delta, StateDelta::ValidationFailed));
    }
}
