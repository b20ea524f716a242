//! `kiln serve`: run the agent server until SIGINT or SIGTERM.

use kiln_agent::ConversationEngine;
use kiln_config::AppConfig;
use kiln_core::Provider;
use kiln_knowledge::{KnowledgeStore, StoreOptions};
use kiln_providers::OllamaProvider;
use kiln_server::{AgentServer, ServerOptions};
use kiln_tools::{Sandbox, default_registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ollama = Arc::new(OllamaProvider::new(
        &config.llm.base_url,
        &config.rag.embedding_model,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?);

    let store = KnowledgeStore::open(
        ollama.clone(),
        StoreOptions {
            chunk_size: config.rag.chunk_size,
            chunk_overlap: config.rag.chunk_overlap,
            extensions: config.rag.extensions.clone(),
            path: config.rag.persistence_path().map(|p| p.to_path_buf()),
        },
    )?;
    let documents = store.count().await;
    let storage = store
        .persistence_path()
        .map_or_else(|| "in memory".to_string(), |p| p.display().to_string());

    let sandbox = Sandbox::new(
        config.sandbox.allowed_roots.clone(),
        config.sandbox.forbidden_paths.clone(),
        config.sandbox.allowed_commands.clone(),
    );
    let tools = Arc::new(default_registry(config.permissions.granted(), sandbox));
    let tool_names = tools.names().join(", ");

    let engine = ConversationEngine::new(ollama.clone(), Arc::new(store), tools, &config.llm.model)
        .with_system_prompt(config.agent.system_prompt.clone())
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens)
        .with_max_iterations(config.agent.max_iterations)
        .with_top_k(config.rag.top_k);

    match ollama.health_check().await {
        Ok(true) => info!(url = ollama.base_url(), "Ollama reachable"),
        Ok(false) | Err(_) => warn!(
            url = ollama.base_url(),
            "Ollama is not reachable; model requests will fail until it is"
        ),
    }

    let server = AgentServer::bind(Arc::new(engine), ServerOptions::from_config(&config.server)).await?;

    println!("🔥 Kiln server");
    println!("   Socket:    {}", server.socket_path().display());
    println!("   Model:     {}", config.llm.model);
    println!("   Embedding: {}", config.rag.embedding_model);
    println!("   Knowledge: {documents} documents ({storage})");
    println!("   Tools:     {}", if tool_names.is_empty() { "none" } else { tool_names.as_str() });

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        let _ = stop_tx.send(true);
    });

    server.serve(stop_rx).await?;
    Ok(())
}
