//! Loan-servicing backend client
//!
//! The servicing API carries its parameters in request headers and
//! wraps replies in success/errors envelopes. Business rejections come
//! back on the Ok channel so handlers can quote them; only transport
//! and server faults use the Err channel.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::error;

use crate::error::DispatchError;
use crate::models::{Customer, LoanStatement};
use crate::Result;

/// Account fields a customer can change from the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountChange {
    EmailAddress(String),
    PaymentReminder(bool),
}

impl AccountChange {
    pub fn endpoint(&self) -> &'static str {
        match self {
            AccountChange::EmailAddress(_) => "/api/Customer/UpdateEmail",
            AccountChange::PaymentReminder(_) => "/api/Customer/UpdatePaymentReminder",
        }
    }

    /// Header name/value pair the servicing API expects for this change.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            AccountChange::EmailAddress(value) => ("newEmailAddress", value.clone()),
            AccountChange::PaymentReminder(value) => ("newPaymentReminder", value.to_string()),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AccountChange::EmailAddress(_) => "email address",
            AccountChange::PaymentReminder(_) => "payment reminder preference",
        }
    }
}

/// Outcome of a write the backend either applies or refuses.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply<T> {
    Accepted(T),
    Rejected(Vec<String>),
}

/// The servicing system of record for customers and loans.
#[async_trait]
pub trait ServicingBackend: Send + Sync {
    async fn customer_by_id(&self, customer_id: &str) -> Result<Option<Customer>>;

    async fn customer_exists(&self, customer_id: &str) -> Result<bool>;

    /// Stronger validation: id plus the last four digits of a phone
    /// number on file.
    async fn verify_customer(
        &self,
        customer_id: &str,
        phone_last4: &str,
    ) -> Result<Option<Customer>>;

    /// Apply an account change. The accepted reply carries the updated
    /// customer record.
    async fn update_account(
        &self,
        customer_id: &str,
        change: &AccountChange,
    ) -> Result<BackendReply<Customer>>;

    async fn loan_statement(&self, customer_id: &str) -> Result<Option<LoanStatement>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    customer: Option<Customer>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckEnvelope {
    #[serde(default)]
    success: bool,
}

/// HTTP client for the servicing API (connection-pooled).
#[derive(Clone)]
pub struct HttpServicingBackend {
    client: Client,
    base_url: String,
}

impl HttpServicingBackend {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build from `SERVICING_API_BASE_URL` (or legacy
    /// `LOAN_API_BASE_URL`).
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("SERVICING_API_BASE_URL")
            .or_else(|_| env::var("LOAN_API_BASE_URL"))
            .ok()?;
        Some(Self::new(&base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_with_headers(
        &self,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let mut request = self.client.get(self.url(path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await.map_err(|e| {
            error!("Servicing API request failed for {}: {}", path, e);
            DispatchError::BackendError(format!("Servicing API request failed for {}: {}", path, e))
        })
    }

    async fn fetch_customer(
        &self,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<Option<Customer>> {
        let response = self.get_with_headers(path, headers).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DispatchError::BackendError(format!(
                "Servicing API returned {} for {}",
                status, path
            )));
        }

        let envelope: CustomerEnvelope = response.json().await.map_err(|e| {
            DispatchError::BackendError(format!("Invalid JSON from {}: {}", path, e))
        })?;

        if envelope.success {
            Ok(envelope.customer)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl ServicingBackend for HttpServicingBackend {
    async fn customer_by_id(&self, customer_id: &str) -> Result<Option<Customer>> {
        self.fetch_customer("/api/Customer", &[("customerId", customer_id)])
            .await
    }

    async fn customer_exists(&self, customer_id: &str) -> Result<bool> {
        let path = "/api/Customer/CheckCustomer";
        let response = self
            .get_with_headers(path, &[("customerId", customer_id)])
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(DispatchError::BackendError(format!(
                "Servicing API returned {} for {}",
                status, path
            )));
        }

        let envelope: CheckEnvelope = response.json().await.unwrap_or_default();
        Ok(envelope.success)
    }

    async fn verify_customer(
        &self,
        customer_id: &str,
        phone_last4: &str,
    ) -> Result<Option<Customer>> {
        self.fetch_customer(
            "/api/Customer/VerifyCustomer",
            &[
                ("customerId", customer_id),
                ("phoneInfoLastFourDigits", phone_last4),
            ],
        )
        .await
    }

    async fn update_account(
        &self,
        customer_id: &str,
        change: &AccountChange,
    ) -> Result<BackendReply<Customer>> {
        let path = change.endpoint();
        let (header_name, header_value) = change.header();

        let response = self
            .client
            .post(self.url(path))
            .header("customerId", customer_id)
            .header(header_name, header_value)
            .send()
            .await
            .map_err(|e| {
                error!("Servicing API request failed for {}: {}", path, e);
                DispatchError::BackendError(format!(
                    "Servicing API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let envelope: CustomerEnvelope = response.json().await.unwrap_or_default();

        // The backend acknowledges applied updates with 202 Accepted
        // and the refreshed record.
        if status.is_success() {
            if let Some(customer) = envelope.customer {
                return Ok(BackendReply::Accepted(customer));
            }
        }

        if !envelope.errors.is_empty() {
            return Ok(BackendReply::Rejected(envelope.errors));
        }

        Err(DispatchError::BackendError(format!(
            "Servicing API returned {} for {}",
            status, path
        )))
    }

    async fn loan_statement(&self, customer_id: &str) -> Result<Option<LoanStatement>> {
        let path = "/api/LoanStatement";
        let response = self
            .get_with_headers(path, &[("customerId", customer_id)])
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DispatchError::BackendError(format!(
                "Servicing API returned {} for {}",
                status, path
            )));
        }

        let statement: LoanStatement = response.json().await.map_err(|e| {
            DispatchError::BackendError(format!("Invalid JSON from {}: {}", path, e))
        })?;
        Ok(Some(statement))
    }
}

/// In-memory backend for the demo binary and tests.
pub struct MockServicingBackend {
    customers: RwLock<HashMap<String, Customer>>,
    statements: RwLock<HashMap<String, LoanStatement>>,
}

impl MockServicingBackend {
    pub fn new() -> Self {
        Self {
            customers: RwLock::new(HashMap::new()),
            statements: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.customers
            .write()
            .await
            .insert(customer.customer_id.clone(), customer);
    }

    pub async fn insert_statement(&self, statement: LoanStatement) {
        self.statements
            .write()
            .await
            .insert(statement.customer_id.clone(), statement);
    }
}

impl Default for MockServicingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServicingBackend for MockServicingBackend {
    async fn customer_by_id(&self, customer_id: &str) -> Result<Option<Customer>> {
        Ok(self.customers.read().await.get(customer_id).cloned())
    }

    async fn customer_exists(&self, customer_id: &str) -> Result<bool> {
        Ok(self.customers.read().await.contains_key(customer_id))
    }

    async fn verify_customer(
        &self,
        customer_id: &str,
        phone_last4: &str,
    ) -> Result<Option<Customer>> {
        let customers = self.customers.read().await;
        let matched = customers.get(customer_id).filter(|customer| {
            customer
                .phone_info
                .as_ref()
                .map(|phones| {
                    let matches = |phone: &Option<String>| {
                        phone
                            .as_ref()
                            .map(|p| p.ends_with(phone_last4))
                            .unwrap_or(false)
                    };
                    matches(&phones.home_phone) || matches(&phones.work_phone)
                })
                .unwrap_or(false)
        });
        Ok(matched.cloned())
    }

    async fn update_account(
        &self,
        customer_id: &str,
        change: &AccountChange,
    ) -> Result<BackendReply<Customer>> {
        let mut customers = self.customers.write().await;
        match customers.get_mut(customer_id) {
            Some(customer) => {
                match change {
                    AccountChange::EmailAddress(email) => {
                        customer.email_address = Some(email.clone());
                    }
                    AccountChange::PaymentReminder(enabled) => {
                        customer.payment_reminder = *enabled;
                    }
                }
                Ok(BackendReply::Accepted(customer.clone()))
            }
            None => Ok(BackendReply::Rejected(vec![
                "Customer not found.".to_string()
            ])),
        }
    }

    async fn loan_statement(&self, customer_id: &str) -> Result<Option<LoanStatement>> {
        Ok(self.statements.read().await.get(customer_id).cloned())
    }
}
