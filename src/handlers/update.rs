//! Account detail updates
//!
//! Handles email address changes and payment reminder opt-in/opt-out.
//! The new value is parsed out of the request text; when it is missing
//! the handler asks for it without touching the backend.

use std::sync::Arc;
use tracing::warn;

use crate::backend::{AccountChange, BackendReply, ServicingBackend};
use crate::session::{SessionState, StateDelta, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub const MSG_NOT_VALIDATED: &str =
    "Please validate your account before updating any details.";
pub const MSG_ASK_FOR_EMAIL: &str =
    "Please share the new email address you would like on your account.";
pub const MSG_ASK_WHICH_DETAIL: &str =
    "I can update your email address or your payment reminder preference. Which would you like to change?";
pub const MSG_UPDATE_UNAVAILABLE: &str =
    "I could not reach the servicing system to apply the update. Please try again in a moment.";

const REMINDER_ON: &[&str] = &["enable", "turn on", "opt in", "start", "subscribe"];
const REMINDER_OFF: &[&str] = &["disable", "turn off", "opt out", "stop", "unsubscribe"];

pub struct AccountUpdateHandler {
    backend: Arc<dyn ServicingBackend>,
}

impl AccountUpdateHandler {
    pub fn new(backend: Arc<dyn ServicingBackend>) -> Self {
        Self { backend }
    }

    async fn apply_change(
        &self,
        customer_id: &str,
        change: AccountChange,
    ) -> Result<TurnOutcome> {
        let confirmation = match &change {
            AccountChange::EmailAddress(email) => {
                format!("Your email address has been updated to {}.", email)
            }
            AccountChange::PaymentReminder(true) => {
                "Payment reminders have been enabled for your account.".to_string()
            }
            AccountChange::PaymentReminder(false) => {
                "Payment reminders have been disabled for your account.".to_string()
            }
        };
        tracing::info!("applying {} update for customer {}", change.describe(), customer_id);
        match self.backend.update_account(customer_id, &change).await {
            Ok(BackendReply::Accepted(customer)) => Ok(TurnOutcome::with_delta(
                confirmation,
                StateDelta::CustomerReplaced { customer },
            )),
            Ok(BackendReply::Rejected(errors)) => Ok(TurnOutcome::reply(errors.join(" "))),
            Err(e) => {
                warn!("account update failed: {}", e);
                Ok(TurnOutcome::reply(MSG_UPDATE_UNAVAILABLE))
            }
        }
    }
}

/// First whitespace-delimited token that looks like an email address:
/// contains '@' and a '.' after it. Trailing punctuation is trimmed.
fn extract_email(input: &str) -> Option<String> {
    for token in input.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let at = match token.find('@') {
            Some(i) => i,
            None => continue,
        };
        if at == 0 || at + 1 >= token.len() {
            continue;
        }
        if token[at + 1..].contains('.') {
            return Some(token.to_string());
        }
    }
    None
}

fn reminder_request(input: &str) -> Option<bool> {
    let lower = input.to_lowercase();
    if !lower.contains("reminder") {
        return None;
    }
    if REMINDER_OFF.iter().any(|kw| lower.contains(kw)) {
        return Some(false);
    }
    if REMINDER_ON.iter().any(|kw| lower.contains(kw)) {
        return Some(true);
    }
    None
}

#[async_trait::async_trait]
impl Handler for AccountUpdateHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::AccountUpdate
    }

    fn description(&self) -> &'static str {
        "Update the customer's email address or payment reminder preference"
    }

    async fn handle(&self, session: &SessionState, input: &str) -> Result<TurnOutcome> {
        let customer = match session.customer() {
            Some(c) => c,
            None => return Ok(TurnOutcome::reply(MSG_NOT_VALIDATED)),
        };

        if let Some(enabled) = reminder_request(input) {
            return self
                .apply_change(&customer.customer_id, AccountChange::PaymentReminder(enabled))
                .await;
        }

        let wants_email = {
            let lower = input.to_lowercase();
            lower.contains("email") || lower.contains("e-mail")
        };
        if let Some(email) = extract_email(input) {
            return self
                .apply_change(&customer.customer_id, AccountChange::EmailAddress(email))
                .await;
        }
        if wants_email {
            return Ok(TurnOutcome::reply(MSG_ASK_FOR_EMAIL));
        }

        Ok(TurnOutcome::reply(MSG_ASK_WHICH_DETAIL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockServicingBackend;
    use crate::models::Customer;
    use uuid::Uuid;

    fn customer() -> Customer {
        Customer {
            customer_id: "565343".to_string(),
            customer_name: "Juan Mathew".to_string(),
            email_address: Some("old@example.com".to_string()),
            payment_method: None,
            created_on: None,
            next_payment: None,
            final_payment: None,
            address: None,
            phone_info: None,
            payment_reminder: true,
            notes: Vec::new(),
        }
    }

    async fn validated_session() -> (AccountUpdateHandler, SessionState) {
        let backend = MockServicingBackend::new();
        backend.insert_customer(customer()).await;
        let handler = AccountUpdateHandler::new(Arc::new(backend));
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });
        (handler, session)
    }

    #[test]
    fn test_email_extraction() {
        assert_eq!(
            extract_email("change my email to juan.new@example.com please"),
            Some("juan.new@example.com".to_string())
        );
        assert_eq!(
            extract_email("use juan@mail.co."),
            Some("juan@mail.co".to_string())
        );
        assert_eq!(extract_email("no address here"), None);
        assert_eq!(extract_email("broken@nodot"), None);
    }

    #[test]
    fn test_reminder_request_parsing() {
        assert_eq!(reminder_request("please turn off my payment reminder"), Some(false));
        assert_eq!(reminder_request("enable reminders again"), Some(true));
        assert_eq!(reminder_request("turn off the lights"), None);
    }

    #[tokio::test]
    async fn test_requires_validation() {
        let backend = MockServicingBackend::new();
        let handler = AccountUpdateHandler::new(Arc::new(backend));
        let session = SessionState::new(Uuid::new_v4(), 3);

        let outcome = handler
            .handle(&session, "update my email to x@y.com")
            .await
            .unwrap();
        assert_eq!(outcome.reply, MSG_NOT_VALIDATED);
    }

    #[tokio::test]
    async fn test_email_update_replaces_customer() {
        let (handler, session) = validated_session().await;

        let outcome = handler
            .handle(&session, "update my email to juan.new@example.com")
            .await
            .unwrap();
        assert!(outcome.reply.contains("juan.new@example.com"));
        match outcome.delta {
            StateDelta::CustomerReplaced { customer } => {
                assert_eq!(
                    customer.email_address.as_deref(),
                    Some("juan.new@example.com")
                );
            }
            other => panic!("expected CustomerReplaced, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reminder_opt_out() {
        let (handler, session) = validated_session().await;

        let outcome = handler
            .handle(&session, "please turn off my payment reminder")
            .await
            .unwrap();
        match outcome.delta {
            StateDelta::CustomerReplaced { customer } => {
                assert!(!customer.payment_reminder);
            }
            other => panic!("expected CustomerReplaced, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_email_asks_without_backend_call() {
        let (handler, session) = validated_session().await;

        let outcome = handler
            .handle(&session, "I want to change my email")
            .await
            .unwrap();
        assert_eq!(outcome.reply, MSG_ASK_FOR_EMAIL);
        assert!(matches!(outcome.delta, StateDelta::None));
    }

    #[tokio::test]
    async fn test_vague_request_asks_which_detail() {
        let (handler, session) = validated_session().await;

        let outcome = handler
            .handle(&session, "update my account").await.unwrap();
        assert_eq!(outcome.reply, MSG_ASK_WHICH_DETAIL);
    }
}
