//! Grounded policy-document queries
//!
//! One handler per document domain, all backed by the same retrieval
//! index. Answers come strictly from retrieved passages; when nothing
//! relevant is found the customer is told so instead of guessing.

use std::sync::Arc;
use tracing::warn;

use crate::retrieval::{DocumentIndex, QueryDomain, MSG_NOT_IN_DOCUMENTS};
use crate::session::{SessionState, TurnOutcome};
use crate::Result;

use super::{Handler, HandlerKind};

pub struct DocumentQueryHandler {
    domain: QueryDomain,
    index: Arc<DocumentIndex>,
}

impl DocumentQueryHandler {
    pub fn new(domain: QueryDomain, index: Arc<DocumentIndex>) -> Self {
        Self { domain, index }
    }
}

#[async_trait::async_trait]
impl Handler for DocumentQueryHandler {
    fn kind(&self) -> HandlerKind {
        match self.domain {
            QueryDomain::Profile => HandlerKind::ProfileQuery,
            QueryDomain::Payments => HandlerKind::PaymentsQuery,
            QueryDomain::Kyc => HandlerKind::KycQuery,
        }
    }

    fn description(&self) -> &'static str {
        match self.domain {
            QueryDomain::Profile => "Answer questions from the customer profile policy documents",
            QueryDomain::Payments => "Answer questions from the payments policy documents",
            QueryDomain::Kyc => "Answer questions from the KYC policy documents",
        }
    }

    async fn handle(&self, _session: &SessionState, input: &str) -> Result<TurnOutcome> {
        match self.index.answer(self.domain, input).await {
            Ok(answer) => Ok(TurnOutcome::reply(answer)),
            Err(e) => {
                warn!("document query failed for {}: {}", self.domain.as_str(), e);
                Ok(TurnOutcome::reply(MSG_NOT_IN_DOCUMENTS))
            }
        }
    }
}
