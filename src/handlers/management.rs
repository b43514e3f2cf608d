//! Loan management what-ifs
//!
//! Outstanding balance, closure quotes, and restructuring simulations
//! (tenure reduction, part payment). The request text is parsed before
//! anything is fetched, so a turn that only asks for a missing value
//! never touches the servicing backend.

use std::sync::Arc;
use tracing::warn;

use crate::backend::ServicingBackend;
use crate::loan::{
    closure_amount, outstanding_balance, simulate_part_payment, simulate_tenure_reduction,
    SimulationOutcome,
};
use crate::models::LoanStatement;
use crate::session::{SessionState, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub const MSG_NOT_VALIDATED: &str =
    "Please validate your account before managing your loan.";
pub const MSG_NO_LOAN: &str = "No active loan was found for your account.";
pub const MSG_BACKEND_UNAVAILABLE: &str =
    "I could not reach the servicing system. Please try again in a moment.";
pub const MSG_ASK_TENURE_MONTHS: &str =
    "By how many months would you like to reduce your tenure?";
pub const MSG_ASK_PART_AMOUNT: &str =
    "What amount would you like to pay as a part payment?";
pub const MSG_NEGATIVE_MONTHS: &str =
    "The number of months cannot be negative. Please enter a positive number.";
pub const MSG_MANAGEMENT_MENU: &str =
    "I can help you check your outstanding balance, get a loan closure quote, simulate a tenure reduction, or simulate a part payment. What would you like to do?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagementRequest {
    TenureReduction,
    PartPayment,
    Closure,
    Balance,
    Menu,
}

fn classify_request(input: &str) -> ManagementRequest {
    let lower = input.to_lowercase();
    if lower.contains("tenure") || lower.contains("shorten") {
        return ManagementRequest::TenureReduction;
    }
    if lower.contains("part payment")
        || lower.contains("partial payment")
        || lower.contains("prepay")
        || lower.contains("lump sum")
        || lower.contains("lumpsum")
        || lower.contains("extra payment")
    {
        return ManagementRequest::PartPayment;
    }
    if lower.contains("foreclos")
        || lower.contains("closure")
        || lower.contains("payoff")
        || lower.contains("pay off")
        || (lower.contains("close") && lower.contains("loan"))
    {
        return ManagementRequest::Closure;
    }
    if lower.contains("outstanding") || lower.contains("balance") || lower.contains("how much") {
        return ManagementRequest::Balance;
    }
    ManagementRequest::Menu
}

/// First numeric token in the text; currency symbols and thousands
/// separators are stripped, a leading minus survives.
fn first_number(input: &str) -> Option<f64> {
    for token in input.split_whitespace() {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if !cleaned.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(value) = cleaned.parse::<f64>() {
            return Some(value);
        }
    }
    None
}

fn render_simulation(outcome: SimulationOutcome) -> String {
    match outcome {
        SimulationOutcome::Revised(revised) => format!(
            "Your new tenure is {} months: the EMI rises from ${:.2} to ${:.2} (${:.2} more per month) on an outstanding principal of ${:.2}.",
            revised.new_tenure_months,
            revised.current_emi,
            revised.new_emi,
            revised.new_emi - revised.current_emi,
            revised.principal
        ),
        SimulationOutcome::PartPayment(impact) => format!(
            "After a part payment of ${:.2} your outstanding principal drops to ${:.2}. You can lower your EMI from ${:.2} to ${:.2} over the same {} months, or keep paying ${:.2} and clear the loan in {} months.",
            impact.amount,
            impact.new_principal,
            impact.current_emi,
            impact.reduced_emi,
            impact.tenure_months,
            impact.current_emi,
            impact.reduced_tenure_months
        ),
        SimulationOutcome::Unchanged { tenure_months, emi } => format!(
            "Your schedule is unchanged: {} months at an EMI of ${:.2}.",
            tenure_months, emi
        ),
        SimulationOutcome::Infeasible(message) | SimulationOutcome::InvalidInput(message) => message,
    }
}

pub struct LoanManagementHandler {
    backend: Arc<dyn ServicingBackend>,
}

impl LoanManagementHandler {
    pub fn new(backend: Arc<dyn ServicingBackend>) -> Self {
        Self { backend }
    }

    async fn fetch_statement(&self, customer_id: &str) -> std::result::Result<LoanStatement, String> {
        match self.backend.loan_statement(customer_id).await {
            Ok(Some(statement)) => Ok(statement),
            Ok(None) => Err(MSG_NO_LOAN.to_string()),
            Err(e) => {
                warn!("statement fetch failed: {}", e);
                Err(MSG_BACKEND_UNAVAILABLE.to_string())
            }
        }
    }
}

#[async_trait::async_trait]
impl Handler for LoanManagementHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::LoanManagement
    }

    fn description(&self) -> &'static str {
        "Outstanding balance, closure quotes, and restructuring simulations"
    }

    async fn handle(&self, session: &SessionState, input: &str) -> Result<TurnOutcome> {
        let customer = match session.customer() {
            Some(c) => c,
            None => return Ok(TurnOutcome::reply(MSG_NOT_VALIDATED)),
        };

        let request = classify_request(input);

        // Parse before fetching: an ask-back turn costs no backend call.
        let tenure_months = match request {
            ManagementRequest::TenureReduction => match first_number(input) {
                Some(n) if n < 0.0 => return Ok(TurnOutcome::reply(MSG_NEGATIVE_MONTHS)),
                Some(n) => Some(n.round() as u32),
                None => return Ok(TurnOutcome::reply(MSG_ASK_TENURE_MONTHS)),
            },
            _ => None,
        };
        let part_amount = match request {
            ManagementRequest::PartPayment => match first_number(input) {
                Some(amount) => Some(amount),
                None => return Ok(TurnOutcome::reply(MSG_ASK_PART_AMOUNT)),
            },
            _ => None,
        };

        if request == ManagementRequest::Menu {
            return Ok(TurnOutcome::reply(MSG_MANAGEMENT_MENU));
        }

        let statement = match self.fetch_statement(&customer.customer_id).await {
            Ok(s) => s,
            Err(reply) => return Ok(TurnOutcome::reply(reply)),
        };
        let summary = &statement.loan_summary;
        let outstanding = outstanding_balance(&statement);

        let reply = match request {
            ManagementRequest::Balance => {
                format!("Your outstanding loan balance is ${:.2}.", outstanding)
            }
            ManagementRequest::Closure => {
                let quote = closure_amount(outstanding, summary.interest_rate);
                format!(
                    "To close your loan today you would pay ${:.2}: outstanding principal ${:.2}, one month's interest ${:.2}, and a foreclosure fee of ${:.2}.",
                    quote.total_payable, quote.outstanding, quote.interest_due, quote.foreclosure_fee
                )
            }
            ManagementRequest::TenureReduction => {
                let reduce_by = tenure_months.unwrap_or(0);
                let outcome = simulate_tenure_reduction(
                    outstanding,
                    summary.interest_rate,
                    summary.tenure_months,
                    summary.emi_amount,
                    reduce_by,
                );
                render_simulation(outcome)
            }
            ManagementRequest::PartPayment => {
                let amount = part_amount.unwrap_or(0.0);
                let outcome = simulate_part_payment(
                    outstanding,
                    summary.interest_rate,
                    summary.tenure_months,
                    summary.emi_amount,
                    amount,
                );
                render_simulation(outcome)
            }
            ManagementRequest::Menu => MSG_MANAGEMENT_MENU.to_string(),
        };

        Ok(TurnOutcome::reply(reply))
    }
}
