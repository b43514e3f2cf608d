//! Loan amortization and restructuring math
//!
//! Pure functions over the statement models: EMI, the chained repayment
//! schedule, closure quotes, and the two what-if simulations (tenure
//! reduction, part payment). Currency values are rounded to cents the
//! way the servicing backend reports them. No I/O here.

use serde::{Deserialize, Serialize};

use crate::models::{LoanPayment, LoanStatement, LoanSummary};

/// Foreclosure fee charged on the outstanding principal at closure.
pub const FORECLOSURE_FEE_RATE: f64 = 0.02;

pub const MSG_PART_PAYMENT_EXCEEDS: &str =
    "The part payment exceeds the outstanding loan. Please enter a lower amount.";
pub const MSG_EMI_TOO_LOW: &str =
    "The current EMI is too low to support this part payment at current rate.";
pub const MSG_NO_OUTSTANDING: &str =
    "There is no outstanding balance on this loan.";

/// Round to cents.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Monthly rate as a fraction of 1, from an annual percentage.
pub fn monthly_rate(annual_rate_percent: f64) -> f64 {
    annual_rate_percent / 100.0 / 12.0
}

/// Equated monthly installment: P·r·(1+r)^n / ((1+r)^n − 1).
pub fn emi(principal: f64, monthly_rate: f64, tenure_months: u32) -> f64 {
    if tenure_months == 0 {
        return round2(principal);
    }
    if monthly_rate <= 0.0 {
        return round2(principal / tenure_months as f64);
    }
    let factor = (1.0 + monthly_rate).powi(tenure_months as i32);
    round2(principal * monthly_rate * factor / (factor - 1.0))
}

/// One fully-amortized repayment row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmortizedPayment {
    pub payment_date: chrono::NaiveDate,
    pub payment_amount: f64,
    pub interest_paid: f64,
    pub principal_paid: f64,
    pub previous_principal: f64,
    pub current_principal: f64,
    pub payment_mode: Option<String>,
    pub transaction_id: Option<String>,
}

/// Chain the repayment schedule in payment-date order, seeded with the
/// loan amount. Rows where the backend already supplies the full split
/// are taken as-is; only incomplete rows are recomputed, and the chain
/// continues from whichever principal the row ends on.
pub fn amortize(summary: &LoanSummary, payments: &[LoanPayment]) -> Vec<AmortizedPayment> {
    let rate = monthly_rate(summary.interest_rate);
    let mut ordered: Vec<&LoanPayment> = payments.iter().collect();
    ordered.sort_by_key(|p| p.payment_date);

    let mut outstanding = summary.loan_amount;
    let mut schedule = Vec::with_capacity(ordered.len());

    for payment in ordered {
        let row = match (
            payment.interest_paid,
            payment.principal_paid,
            payment.previous_principal,
            payment.current_principal,
        ) {
            (Some(interest), Some(principal), Some(previous), Some(current)) => {
                AmortizedPayment {
                    payment_date: payment.payment_date,
                    payment_amount: payment.payment_amount,
                    interest_paid: interest,
                    principal_paid: principal,
                    previous_principal: previous,
                    current_principal: current,
                    payment_mode: payment.payment_mode.clone(),
                    transaction_id: payment.transaction_id.clone(),
                }
            }
            _ => {
                let interest = round2(outstanding * rate);
                let principal = round2(payment.payment_amount - interest);
                let current = round2(outstanding - principal);
                AmortizedPayment {
                    payment_date: payment.payment_date,
                    payment_amount: payment.payment_amount,
                    interest_paid: interest,
                    principal_paid: principal,
                    previous_principal: round2(outstanding),
                    current_principal: current,
                    payment_mode: payment.payment_mode.clone(),
                    transaction_id: payment.transaction_id.clone(),
                }
            }
        };
        outstanding = row.current_principal;
        schedule.push(row);
    }

    schedule
}

/// Outstanding principal after the latest payment, or the full loan
/// amount when nothing has been paid yet.
pub fn outstanding_balance(statement: &LoanStatement) -> f64 {
    amortize(&statement.loan_summary, &statement.payment_history)
        .last()
        .map(|row| row.current_principal)
        .unwrap_or(statement.loan_summary.loan_amount)
}

/// Quote for closing the loan today: outstanding principal plus one
/// month of simple interest plus the foreclosure fee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosureQuote {
    pub outstanding: f64,
    pub interest_due: f64,
    pub foreclosure_fee: f64,
    pub total_payable: f64,
}

pub fn closure_amount(outstanding: f64, annual_rate_percent: f64) -> ClosureQuote {
    let interest_due = round2(outstanding * monthly_rate(annual_rate_percent));
    let foreclosure_fee = round2(outstanding * FORECLOSURE_FEE_RATE);
    ClosureQuote {
        outstanding: round2(outstanding),
        interest_due,
        foreclosure_fee,
        total_payable: round2(outstanding + interest_due + foreclosure_fee),
    }
}

/// Result of a restructuring what-if.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutcome {
    /// Tenure reduction: shorter term, re-leveled EMI.
    Revised(RevisedSchedule),
    /// Part payment: both readings of the reduced principal.
    PartPayment(PartPaymentImpact),
    /// Zero-valued input: nothing to restructure, schedule unchanged.
    Unchanged { tenure_months: u32, emi: f64 },
    /// The request cannot produce a schedule; message is customer-facing.
    Infeasible(String),
    /// Malformed input data (negative amounts).
    InvalidInput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisedSchedule {
    pub new_tenure_months: u32,
    pub new_emi: f64,
    /// EMI before the revision, for reporting the monthly step-up.
    pub current_emi: f64,
    /// Principal the revision was computed over.
    pub principal: f64,
}

/// A lump-sum part payment read two ways over the same reduced
/// principal: lower the EMI keeping the tenure, or keep the EMI and
/// let the tenure shrink.
#[derive(Debug, Clone, PartialEq)]
pub struct PartPaymentImpact {
    pub amount: f64,
    /// Principal left after the lump sum.
    pub new_principal: f64,
    pub current_emi: f64,
    pub tenure_months: u32,
    /// EMI re-leveled over the unchanged tenure.
    pub reduced_emi: f64,
    /// Months to clear the new principal at the unchanged EMI.
    pub reduced_tenure_months: u32,
}

/// Shorten the tenure by `reduce_by_months`, keeping the outstanding
/// principal, and re-level the EMI over the shorter term. Tenure never
/// drops below one month.
pub fn simulate_tenure_reduction(
    outstanding: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
    current_emi: f64,
    reduce_by_months: u32,
) -> SimulationOutcome {
    if reduce_by_months == 0 {
        return SimulationOutcome::Unchanged {
            tenure_months,
            emi: current_emi,
        };
    }
    if outstanding <= 0.0 {
        return SimulationOutcome::Infeasible(MSG_NO_OUTSTANDING.to_string());
    }
    let new_tenure = tenure_months.saturating_sub(reduce_by_months).max(1);
    let new_emi = emi(outstanding, monthly_rate(annual_rate_percent), new_tenure);
    SimulationOutcome::Revised(RevisedSchedule {
        new_tenure_months: new_tenure,
        new_emi,
        current_emi,
        principal: round2(outstanding),
    })
}

/// Apply a lump-sum part payment and report both readings: the EMI
/// re-leveled over the unchanged tenure, and the months left at the
/// unchanged EMI, n' = ln(EMI / (EMI − P'·r)) / ln(1 + r). When the
/// EMI cannot amortize the residual at all the whole simulation is
/// infeasible.
pub fn simulate_part_payment(
    outstanding: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
    current_emi: f64,
    part_payment: f64,
) -> SimulationOutcome {
    if part_payment < 0.0 {
        return SimulationOutcome::InvalidInput(
            "The part payment amount cannot be negative.".to_string(),
        );
    }
    if outstanding <= 0.0 {
        return SimulationOutcome::Infeasible(MSG_NO_OUTSTANDING.to_string());
    }
    if part_payment == 0.0 {
        return SimulationOutcome::Unchanged {
            tenure_months,
            emi: current_emi,
        };
    }
    if part_payment >= outstanding {
        return SimulationOutcome::Infeasible(MSG_PART_PAYMENT_EXCEEDS.to_string());
    }

    let new_principal = outstanding - part_payment;
    let rate = monthly_rate(annual_rate_percent);
    let reduced_emi = emi(new_principal, rate, tenure_months);
    match months_to_clear(new_principal, rate, current_emi) {
        Some(months) => SimulationOutcome::PartPayment(PartPaymentImpact {
            amount: round2(part_payment),
            new_principal: round2(new_principal),
            current_emi,
            tenure_months,
            reduced_emi,
            reduced_tenure_months: months.ceil().max(1.0) as u32,
        }),
        None => SimulationOutcome::Infeasible(MSG_EMI_TOO_LOW.to_string()),
    }
}

/// Months needed to clear `principal` at `emi` per month, or `None`
/// when the EMI does not even cover the running interest.
fn months_to_clear(principal: f64, monthly_rate: f64, emi: f64) -> Option<f64> {
    if principal <= 0.0 {
        return Some(0.0);
    }
    if emi <= 0.0 {
        return None;
    }
    if monthly_rate <= 0.0 {
        return Some(principal / emi);
    }
    let margin = emi - principal * monthly_rate;
    if margin <= 0.0 {
        return None;
    }
    Some((emi / margin).ln() / (1.0 + monthly_rate).ln())
}
