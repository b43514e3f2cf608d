use loan_support_orchestrator::{
    agent::TurnController,
    api::start_server,
    backend::HttpServicingBackend,
    chat::{ChatGateway, HttpChatStore},
    classifier::LlmIntentClassifier,
    graph::DispatchGraph,
    handlers::create_default_registry,
    llm::{CompletionClient, GeminiClient},
    retrieval::HttpPassageRetriever,
    session::DEFAULT_RETRY_LIMIT,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let retry_limit: u32 = std::env::var("VALIDATION_RETRY_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RETRY_LIMIT);

    info!("🚀 Concorde Finances Loan Support - API Server");
    info!("📍 Port: {}", api_port);

    // Create collaborators
    let backend = Arc::new(HttpServicingBackend::from_env().unwrap_or_else(|| {
        eprintln!("⚠️  SERVICING_API_BASE_URL not set in .env");
        eprintln!("📌 Falling back to http://localhost:5000");
        HttpServicingBackend::new("http://localhost:5000")
    }));
    let chat_store = Arc::new(HttpChatStore::from_env().unwrap_or_else(|| {
        eprintln!("⚠️  CHAT_API_BASE_URL not set in .env");
        eprintln!("📌 Falling back to http://localhost:5000");
        HttpChatStore::new("http://localhost:5000")
    }));
    let retriever = Arc::new(HttpPassageRetriever::from_env().unwrap_or_else(|| {
        eprintln!("⚠️  RETRIEVAL_API_BASE_URL not set in .env");
        eprintln!("📌 Falling back to http://localhost:8001");
        HttpPassageRetriever::new("http://localhost:8001")
    }));
    let llm: Arc<dyn CompletionClient> = Arc::new(GeminiClient::from_env());

    let chats = Arc::new(ChatGateway::new(chat_store));
    let classifier = Arc::new(LlmIntentClassifier::new(llm.clone()));

    // Create the dispatch graph and turn controller
    let registry = create_default_registry(backend, chats.clone(), llm.clone(), retriever);
    let graph = DispatchGraph::new(registry, classifier);
    let controller =
        Arc::new(TurnController::new(graph, chats.clone(), llm).with_retry_limit(retry_limit));

    info!("✅ Turn controller initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(controller, chats, api_port).await?;

    Ok(())
}
