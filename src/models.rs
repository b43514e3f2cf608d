//! Core data models for the loan-support assistant
//!
//! Wire shapes follow the servicing backend's camelCase JSON. Optional
//! fields default so partially-populated backend records still parse.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Customer =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub customer_id: String,
    pub customer_name: String,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_payment: Option<NaiveDate>,
    #[serde(default)]
    pub final_payment: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub phone_info: Option<PhoneInfo>,
    #[serde(default)]
    pub payment_reminder: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhoneInfo {
    #[serde(default)]
    pub home_phone: Option<String>,
    #[serde(default)]
    pub work_phone: Option<String>,
}

//
// ================= Loan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanSummary {
    pub loan_amount: f64,
    /// Annual interest rate in percent (7.5 means 7.5% p.a.).
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub emi_amount: f64,
    pub start_date: NaiveDate,
    #[serde(default = "default_loan_status")]
    pub status: String,
}

fn default_loan_status() -> String {
    "Active".to_string()
}

/// One repayment row as the servicing backend reports it. The split
/// fields are present when the backend has already amortized the
/// payment and absent for raw imports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanPayment {
    pub payment_date: NaiveDate,
    pub payment_amount: f64,
    #[serde(default)]
    pub interest_paid: Option<f64>,
    #[serde(default)]
    pub principal_paid: Option<f64>,
    #[serde(default)]
    pub previous_principal: Option<f64>,
    #[serde(default)]
    pub current_principal: Option<f64>,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanStatement {
    pub customer_id: String,
    #[serde(default)]
    pub loan_account_number: Option<String>,
    pub loan_summary: LoanSummary,
    #[serde(default)]
    pub payment_history: Vec<LoanPayment>,
}

//
// ================= Chat =================
//

/// Listing entry returned by the chat backend for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl fmt::Display for Customer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.customer_name, self.customer_id)
    }
}

impl ChatRecord {
    /// Title for display, falling back to the creation date when the
    /// backend never stored one.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => format!("Chat {}", self.created_at.format("%Y-%m-%d")),
        }
    }
}
