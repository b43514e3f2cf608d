//! Loan statement rendering
//!
//! Fetches the statement from the servicing backend, amortizes the
//! payment history, and renders a markdown summary plus repayment
//! table. The amortized schedule rides along as a turn artifact so the
//! API layer can ship structured data next to the prose.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

use crate::backend::ServicingBackend;
use crate::loan::{amortize, AmortizedPayment};
use crate::models::LoanStatement;
use crate::session::{SessionState, StatementArtifact, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub const MSG_NOT_VALIDATED: &str =
    "Please validate your account before requesting a loan statement.";
pub const MSG_NO_LOAN: &str = "No active loan was found for your account.";
pub const MSG_STATEMENT_UNAVAILABLE: &str =
    "I could not reach the servicing system to fetch your statement. Please try again in a moment.";

pub struct LoanStatementHandler {
    backend: Arc<dyn ServicingBackend>,
}

impl LoanStatementHandler {
    pub fn new(backend: Arc<dyn ServicingBackend>) -> Self {
        Self { backend }
    }
}

fn render_statement(statement: &LoanStatement, schedule: &[AmortizedPayment]) -> String {
    let summary = &statement.loan_summary;
    let mut out = String::from("Here is your loan statement:\n\n");

    out.push_str("**Loan Summary**\n");
    if let Some(account) = &statement.loan_account_number {
        let _ = writeln!(out, "- Account: {}", account);
    }
    let _ = writeln!(out, "- Loan Amount: ${:.2}", summary.loan_amount);
    let _ = writeln!(out, "- Interest Rate: {}% p.a.", summary.interest_rate);
    let _ = writeln!(out, "- Tenure: {} months", summary.tenure_months);
    let _ = writeln!(out, "- EMI: ${:.2}", summary.emi_amount);
    let _ = writeln!(out, "- Start Date: {}", summary.start_date);
    let _ = writeln!(out, "- Status: {}", summary.status);

    if schedule.is_empty() {
        out.push_str("\nNo payments have been recorded yet.\n");
        return out;
    }

    out.push_str("\n**Payment History**\n");
    out.push_str("| # | Date | Payment | Interest | Principal | Outstanding |\n");
    out.push_str("|---|------|---------|----------|-----------|-------------|\n");
    for (i, row) in schedule.iter().enumerate() {
        let _ = writeln!(
            out,
            "| {} | {} | ${:.2} | ${:.2} | ${:.2} | ${:.2} |",
            i + 1,
            row.payment_date,
            row.payment_amount,
            row.interest_paid,
            row.principal_paid,
            row.current_principal,
        );
    }
    out
}

#[async_trait::async_trait]
impl Handler for LoanStatementHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::LoanStatement
    }

    fn description(&self) -> &'static str {
        "Fetch and render the customer's loan statement with amortized history"
    }

    async fn handle(&self, session: &SessionState, _input: &str) -> Result<TurnOutcome> {
        let customer = match session.customer() {
            Some(c) => c,
            None => return Ok(TurnOutcome::reply(MSG_NOT_VALIDATED)),
        };

        let statement = match self.backend.loan_statement(&customer.customer_id).await {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(TurnOutcome::reply(MSG_NO_LOAN)),
            Err(e) => {
                warn!("statement fetch failed: {}", e);
                return Ok(TurnOutcome::reply(MSG_STATEMENT_UNAVAILABLE));
            }
        };

        let schedule = amortize(&statement.loan_summary, &statement.payment_history);
        let reply = render_statement(&statement, &schedule);
        Ok(TurnOutcome::with_artifact(
            reply,
            StatementArtifact {
                statement,
                schedule,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockServicingBackend;
    use crate::models::{Customer, LoanPayment, LoanSummary};
    use crate::session::StateDelta;
    use chrono::NaiveDate;
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

    fn statement() -> LoanStatement {
        LoanStatement {
            customer_id: "565343".to_string(),
            loan_account_number: Some("LN-9921".to_string()),
            loan_summary: LoanSummary {
                loan_amount: 500000.0,
                interest_rate: 7.5,
                tenure_months: 60,
                emi_amount: 10018.97,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                status: "Active".to_string(),
            },
            payment_history: vec![
                LoanPayment {
                    payment_date: NaiveDate::from_ymd_opt(2024, 2, 5).unwrap(),
                    payment_amount: 10018.97,
                    interest_paid: None,
                    principal_paid: None,
                    previous_principal: None,
                    current_principal: None,
                    payment_mode: Some("UPI".to_string()),
                    transaction_id: Some("TX-1".to_string()),
                },
                LoanPayment {
                    payment_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                    payment_amount: 10018.97,
                    interest_paid: None,
                    principal_paid: None,
                    previous_principal: None,
                    current_principal: None,
                    payment_mode: Some("UPI".to_string()),
                    transaction_id: Some("TX-2".to_string()),
                },
            ],
        }
    }

    async fn handler_with_loan() -> (LoanStatementHandler, SessionState) {
        let backend = MockServicingBackend::new();
        backend.insert_customer(customer()).await;
        backend.insert_statement(statement()).await;
        let handler = LoanStatementHandler::new(Arc::new(backend));
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });
        (handler, session)
    }

    #[tokio::test]
    async fn test_statement_renders_table_and_artifact() {
        let (handler, session) = handler_with_loan().await;

        let outcome = handler.handle(&session, "show my statement").await.unwrap();
        assert!(outcome.reply.contains("**Loan Summary**"));
        assert!(outcome.reply.contains("| # | Date | Payment | Interest | Principal | Outstanding |"));
        // First month at 7.5% p.a.: interest 3125.00, principal 6893.97.
        assert!(outcome.reply.contains("$3125.00"));
        assert!(outcome.reply.contains("$493106.03"));

        let artifact = outcome.artifact.expect("statement artifact");
        assert_eq!(artifact.schedule.len(), 2);
        assert_eq!(artifact.schedule[1].current_principal, 486168.97);
    }

    #[tokio::test]
    async fn test_requires_validation() {
        let backend = MockServicingBackend::new();
        let handler = LoanStatementHandler::new(Arc::new(backend));
        let session = SessionState::new(Uuid::new_v4(), 3);

        let outcome = handler.handle(&session, "statement please").await.unwrap();
        assert_eq!(outcome.reply, MSG_NOT_VALIDATED);
        assert!(outcome.artifact.is_none());
    }

    #[tokio::test]
    async fn test_no_loan_on_file() {
        let backend = MockServicingBackend::new();
        backend.insert_customer(customer()).await;
        let handler = LoanStatementHandler::new(Arc::new(backend));
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });

        let outcome = handler.handle(&session, "statement please").await.unwrap();
        assert_eq!(outcome.reply, MSG_NO_LOAN);
    }

    #[tokio::test]
    async fn test_empty_history_renders_without_table() {
        let backend = MockServicingBackend::new();
        backend.insert_customer(customer()).await;
        let mut bare = statement();
        bare.payment_history.clear();
        backend.insert_statement(bare).await;
        let handler = LoanStatementHandler::new(Arc::new(backend));
        let mut session = SessionState::new(Uuid::new_v4(), 3);
        session.apply(StateDelta::Validated {
            customer: customer(),
        });

        let outcome = handler.handle(&session, "statement please").await.unwrap();
        assert!(outcome.reply.contains("No payments have been recorded yet."));
        assert!(!outcome.reply.contains("| # |"));
        let artifact = outcome.artifact.expect("artifact still attached");
        assert!(artifact.schedule.is_empty());
    }
}
