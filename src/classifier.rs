//! Intent classification for the supervisor
//!
//! Maps one user turn onto the registered capabilities. Keyword scoring
//! runs first (deterministic, zero allocation); an LLM label pass picks
//! up only the turns the keywords cannot place, and any model failure
//! falls back to the general intent.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::CompletionClient;

/// Capabilities the supervisor can route to. `General` means no
/// handoff: the supervisor answers directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Validate,
    UpdateAccount,
    LoanStatement,
    ManageLoan,
    ProfileQuery,
    PaymentsQuery,
    KycQuery,
    ActivitySummary,
    General,
}

impl Intent {
    pub const ALL: &'static [Intent] = &[
        Intent::Validate,
        Intent::UpdateAccount,
        Intent::LoanStatement,
        Intent::ManageLoan,
        Intent::ProfileQuery,
        Intent::PaymentsQuery,
        Intent::KycQuery,
        Intent::ActivitySummary,
        Intent::General,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Intent::Validate => "validate",
            Intent::UpdateAccount => "update_account",
            Intent::LoanStatement => "loan_statement",
            Intent::ManageLoan => "manage_loan",
            Intent::ProfileQuery => "profile_query",
            Intent::PaymentsQuery => "payments_query",
            Intent::KycQuery => "kyc_query",
            Intent::ActivitySummary => "activity_summary",
            Intent::General => "general",
        }
    }

    pub fn from_label(label: &str) -> Option<Intent> {
        let normalized = label
            .trim()
            .to_lowercase()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .to_string();
        Intent::ALL
            .iter()
            .copied()
            .find(|intent| intent.label() == normalized)
    }

    /// One-line capability description, used in the routing prompt.
    pub fn description(&self) -> &'static str {
        match self {
            Intent::Validate => "validate or re-validate the customer's identity",
            Intent::UpdateAccount => {
                "change the email address or payment reminder preference"
            }
            Intent::LoanStatement => "show the loan statement with the EMI breakdown",
            Intent::ManageLoan => {
                "outstanding balance, loan closure quote, tenure reduction or part payment"
            }
            Intent::ProfileQuery => "questions about the customer relationship summary",
            Intent::PaymentsQuery => "questions about the deposit account agreement",
            Intent::KycQuery => "questions about KYC policy and required documents",
            Intent::ActivitySummary => "summarize the customer's conversations from the last week",
            Intent::General => "greetings, thanks, or anything outside the other capabilities",
        }
    }
}

/// Static keyword lists for deterministic first-pass routing
const VALIDATE_KEYWORDS: &[&str] = &[
    "validate", "verify", "customer id", "log me in", "login", "sign in", "authenticate",
];

const UPDATE_KEYWORDS: &[&str] = &[
    "update", "change", "new email", "email address", "reminder", "opt in", "opt out",
    "unsubscribe",
];

const STATEMENT_KEYWORDS: &[&str] = &[
    "statement", "emi breakdown", "payment history", "transactions", "amortization",
    "repayment schedule", "loan summary", "summary of my loan",
];

const MANAGE_KEYWORDS: &[&str] = &[
    "balance", "outstanding", "close my loan", "closure", "foreclos", "payoff", "pay off",
    "tenure", "part payment", "prepay", "lump sum",
];

const SUMMARY_KEYWORDS: &[&str] = &[
    "summary of my chats", "chat summary", "last week", "recent conversations", "recap",
    "what did we discuss", "past chats",
];

const KYC_KEYWORDS: &[&str] = &[
    "kyc", "know your customer", "identity proof", "address proof", "document requirements",
];

const PAYMENTS_KEYWORDS: &[&str] = &[
    "deposit", "account agreement", "fees", "charges", "payment policy", "overdraft",
    "minimum balance",
];

const PROFILE_KEYWORDS: &[&str] = &[
    "my profile", "my details", "relationship summary", "account holder",
    "personal information",
];

/// Priority-ordered keyword table; earlier entries win score ties.
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::UpdateAccount, UPDATE_KEYWORDS),
    (Intent::ManageLoan, MANAGE_KEYWORDS),
    (Intent::LoanStatement, STATEMENT_KEYWORDS),
    (Intent::ActivitySummary, SUMMARY_KEYWORDS),
    (Intent::KycQuery, KYC_KEYWORDS),
    (Intent::PaymentsQuery, PAYMENTS_KEYWORDS),
    (Intent::ProfileQuery, PROFILE_KEYWORDS),
    (Intent::Validate, VALIDATE_KEYWORDS),
];

fn keyword_route(input: &str, available: &[Intent]) -> Intent {
    let text = input.to_lowercase();

    let mut best = Intent::General;
    let mut best_score = 0usize;
    for (intent, keywords) in INTENT_KEYWORDS {
        if !available.contains(intent) {
            continue;
        }
        let score = keywords.iter().filter(|kw| text.contains(**kw)).count();
        if score > best_score {
            best = *intent;
            best_score = score;
        }
    }
    best
}

/// Classify one user turn against the currently registered capabilities.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, input: &str, available: &[Intent]) -> Intent;
}

/// Pure keyword classifier.
pub struct KeywordIntentClassifier;

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, input: &str, available: &[Intent]) -> Intent {
        keyword_route(input, available)
    }
}

/// Keyword routing with an LLM label pass for the turns the keywords
/// cannot place.
pub struct LlmIntentClassifier {
    llm: Arc<dyn CompletionClient>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    fn routing_prompt(available: &[Intent]) -> String {
        let mut prompt = String::from(
            "You are the routing supervisor for a loan-servicing support assistant. \
             Classify the customer's message into exactly one capability label.\n\nLabels:\n",
        );
        for intent in available {
            prompt.push_str(&format!("- {}: {}\n", intent.label(), intent.description()));
        }
        prompt.push_str("\nReply with exactly one label and nothing else.");
        prompt
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, input: &str, available: &[Intent]) -> Intent {
        let keyword_intent = keyword_route(input, available);
        if keyword_intent != Intent::General {
            debug!(intent = keyword_intent.label(), "keyword routing matched");
            return keyword_intent;
        }

        let system = Self::routing_prompt(available);
        match self.llm.complete(&system, input).await {
            Ok(reply) => match Intent::from_label(&reply) {
                Some(intent) if available.contains(&intent) => {
                    debug!(intent = intent.label(), "llm routing matched");
                    intent
                }
                _ => {
                    warn!(reply = %reply, "llm routing returned an unknown label");
                    Intent::General
                }
            },
            Err(e) => {
                warn!("llm routing unavailable, defaulting to general: {}", e);
                Intent::General
            }
        }
    }
}
