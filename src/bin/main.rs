use loan_support_orchestrator::{
    agent::TurnController,
    backend::MockServicingBackend,
    chat::{ChatGateway, InMemoryChatStore},
    classifier::KeywordIntentClassifier,
    graph::DispatchGraph,
    handlers::create_default_registry,
    llm::{CompletionClient, MockCompletionClient},
    models::{Customer, LoanPayment, LoanStatement, LoanSummary, PhoneInfo},
    retrieval::{QueryDomain, StaticPassageRetriever},
};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn demo_customer() -> Customer {
    Customer {
        customer_id: "565343".to_string(),
        customer_name: "Juan Mathew".to_string(),
        email_address: Some("juan.mathew@example.com".to_string()),
        payment_method: Some("Auto debit".to_string()),
        created_on: None,
        next_payment: NaiveDate::from_ymd_opt(2024, 4, 5),
        final_payment: NaiveDate::from_ymd_opt(2028, 12, 5),
        address: None,
        phone_info: Some(PhoneInfo {
            home_phone: Some("555-0142-7788".to_string()),
            work_phone: None,
        }),
        payment_reminder: true,
        notes: Vec::new(),
    }
}

fn demo_statement() -> LoanStatement {
    let payment = |year, month, day, tx: &str| LoanPayment {
        payment_date: NaiveDate::from_ymd_opt(year, month, day).unwrap(),
        payment_amount: 10018.97,
        interest_paid: None,
        principal_paid: None,
        previous_principal: None,
        current_principal: None,
        payment_mode: Some("Auto debit".to_string()),
        transaction_id: Some(tx.to_string()),
    };

    LoanStatement {
        customer_id: "565343".to_string(),
        loan_account_number: Some("LN-2024-0117".to_string()),
        loan_summary: LoanSummary {
            loan_amount: 500000.0,
            interest_rate: 7.5,
            tenure_months: 60,
            emi_amount: 10018.97,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            status: "Active".to_string(),
        },
        payment_history: vec![
            payment(2024, 2, 5, "TX-2024-0205"),
            payment(2024, 3, 5, "TX-2024-0305"),
        ],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Concorde Finances loan support demo starting");

    // In-memory collaborators seeded with one customer and loan
    let backend = Arc::new(MockServicingBackend::new());
    backend.insert_customer(demo_customer()).await;
    backend.insert_statement(demo_statement()).await;

    let chats = Arc::new(ChatGateway::new(Arc::new(InMemoryChatStore::new())));
    let llm: Arc<dyn CompletionClient> =
        Arc::new(MockCompletionClient::new("Loan servicing questions"));
    let retriever = Arc::new(
        StaticPassageRetriever::new()
            .with_passages(
                QueryDomain::Kyc,
                &["KYC documents must be refreshed every two years for high-risk customers."],
            )
            .with_passages(
                QueryDomain::Payments,
                &["A grace period of 15 days applies to every EMI due date."],
            ),
    );

    let registry = create_default_registry(backend, chats.clone(), llm.clone(), retriever);
    let graph = DispatchGraph::new(registry, Arc::new(KeywordIntentClassifier));
    let controller = TurnController::new(graph, chats, llm);

    let session_id = Uuid::new_v4();
    let script = [
        "hello there",
        "my customer id is 565343",
        "show me my loan statement",
        "what is my outstanding balance?",
        "reduce my tenure by 12 months",
        "simulate a part payment of 100000",
        "turn off my payment reminder please",
        "what is the grace period for an EMI payment?",
        "thanks, that is all",
    ];

    println!("\n=== CONCORDE FINANCES SUPPORT DEMO ===");
    for message in script {
        println!("\nUser: {}", message);
        match controller.process_turn(session_id, None, message).await {
            Ok(response) => {
                println!("Assistant: {}", response.reply);
                if let Some(handler) = &response.handler {
                    println!("  [handled by: {}]", handler);
                }
            }
            Err(e) => {
                eprintln!("Turn failed: {}", e);
                return Err(Box::new(e) as Box<dyn std::error::Error>);
            }
        }
    }

    Ok(())
}
