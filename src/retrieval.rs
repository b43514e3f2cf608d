//! Policy-document retrieval
//!
//! Top-k passage retrieval per document corpus, composed with one
//! grounded completion by [`DocumentIndex`]. Building the indexes
//! themselves (PDF parsing, embedding) happens offline in a separate
//! service; this module only queries it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::error::DispatchError;
use crate::llm::CompletionClient;
use crate::Result;

/// Passages fetched per query before reranking.
pub const TOP_K_RETRIEVE: usize = 20;
/// Passages kept after reranking and fed to the model.
pub const TOP_K_RERANK: usize = 5;

pub const MSG_NOT_IN_DOCUMENTS: &str =
    "The information is not available in the policy documents.";

/// Document corpus a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDomain {
    Profile,
    Payments,
    Kyc,
}

impl QueryDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryDomain::Profile => "profile",
            QueryDomain::Payments => "payments",
            QueryDomain::Kyc => "kyc",
        }
    }

    /// Human name of the underlying document set.
    pub fn corpus_name(&self) -> &'static str {
        match self {
            QueryDomain::Profile => "Customer Relation Summary",
            QueryDomain::Payments => "Deposit Account Agreement",
            QueryDomain::Kyc => "KYC Policy Documents",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: f32,
}

/// Ranked passage lookup against one corpus.
#[async_trait]
pub trait PassageRetriever: Send + Sync {
    async fn retrieve(
        &self,
        domain: QueryDomain,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveEnvelope {
    #[serde(default)]
    passages: Vec<Passage>,
}

/// HTTP client for the retrieval service (connection-pooled).
#[derive(Clone)]
pub struct HttpPassageRetriever {
    client: Client,
    base_url: String,
}

impl HttpPassageRetriever {
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

    /// Build from `RETRIEVAL_API_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("RETRIEVAL_API_BASE_URL").ok()?;
        Some(Self::new(&base_url))
    }
}

#[async_trait]
impl PassageRetriever for HttpPassageRetriever {
    async fn retrieve(
        &self,
        domain: QueryDomain,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>> {
        let path = "/api/v1/retrieve";
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .json(&json!({
                "domain": domain.as_str(),
                "query": query,
                "topK": k,
                "rerankTop": TOP_K_RERANK,
            }))
            .send()
            .await
            .map_err(|e| {
                error!("Retrieval request failed for {}: {}", path, e);
                DispatchError::RetrievalError(format!(
                    "Retrieval request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::RetrievalError(format!(
                "Retrieval service returned {} for {}",
                status, path
            )));
        }

        let envelope: RetrieveEnvelope = response.json().await.map_err(|e| {
            DispatchError::RetrievalError(format!("Invalid JSON from {}: {}", path, e))
        })?;
        Ok(envelope.passages)
    }
}

/// Fixed passage lists per corpus for the demo binary and tests.
pub struct StaticPassageRetriever {
    passages: HashMap<QueryDomain, Vec<Passage>>,
}

impl StaticPassageRetriever {
    pub fn new() -> Self {
        Self {
            passages: HashMap::new(),
        }
    }

    pub fn with_passages(mut self, domain: QueryDomain, texts: &[&str]) -> Self {
        let entry = self.passages.entry(domain).or_default();
        for (i, text) in texts.iter().enumerate() {
            entry.push(Passage {
                text: text.to_string(),
                source: Some(format!("{} p.{}", domain.corpus_name(), i + 1)),
                score: 1.0 - i as f32 * 0.05,
            });
        }
        self
    }
}

impl Default for StaticPassageRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PassageRetriever for StaticPassageRetriever {
    async fn retrieve(
        &self,
        domain: QueryDomain,
        _query: &str,
        k: usize,
    ) -> Result<Vec<Passage>> {
        Ok(self
            .passages
            .get(&domain)
            .map(|p| p.iter().take(k).cloned().collect())
            .unwrap_or_default())
    }
}

/// One logical RAG call: retrieve, keep the reranked head, answer
/// strictly from that context.
pub struct DocumentIndex {
    retriever: Arc<dyn PassageRetriever>,
    llm: Arc<dyn CompletionClient>,
}

impl DocumentIndex {
    pub fn new(retriever: Arc<dyn PassageRetriever>, llm: Arc<dyn CompletionClient>) -> Self {
        Self { retriever, llm }
    }

    pub async fn answer(&self, domain: QueryDomain, question: &str) -> Result<String> {
        let passages = self
            .retriever
            .retrieve(domain, question, TOP_K_RETRIEVE)
            .await?;

        if passages.is_empty() {
            return Ok(MSG_NOT_IN_DOCUMENTS.to_string());
        }

        let context = passages
            .iter()
            .take(TOP_K_RERANK)
            .enumerate()
            .map(|(i, p)| format!("[{}] {}", i + 1, p.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let system = format!(
            "You are a support assistant for Concorde Finances answering from the {}. \
             Answer based solely on the provided context. If the context does not \
             contain the answer, state that the information is not available in the \
             policy documents.",
            domain.corpus_name()
        );
        let user = format!("Context:\n{}\n\nQuestion: {}", context, question);

        self.llm.complete(&system, &user).await
    }
}
