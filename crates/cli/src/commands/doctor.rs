//! `kiln doctor`: diagnose setup problems.

use kiln_core::{Embedder, Provider};
use kiln_providers::OllamaProvider;
use kiln_server::{Client, Request, RequestKind};
use std::path::Path;
use std::time::Duration;

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Kiln Doctor");
    println!("=============\n");

    let mut issues = 0;

    let config_path = super::config_file(explicit);
    if config_path.exists() {
        println!("  ✅ Config file: {}", config_path.display());
    } else {
        println!("  ℹ️  No config file at {}, using defaults", config_path.display());
    }

    let config = match super::load_config(explicit) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  Fix the config file before running other checks.");
            return Ok(());
        }
    };

    let ollama = OllamaProvider::new(
        &config.llm.base_url,
        &config.rag.embedding_model,
        Duration::from_secs(10),
    )?;
    match ollama.health_check().await {
        Ok(true) => {
            println!("  ✅ Ollama reachable at {}", ollama.base_url());
            match ollama.embed("kiln doctor").await {
                Ok(v) => println!("  ✅ Embedding model {} ({} dimensions)", config.rag.embedding_model, v.len()),
                Err(e) => {
                    println!("  ❌ Embedding model {}: {e}", config.rag.embedding_model);
                    println!("     Try: ollama pull {}", config.rag.embedding_model);
                    issues += 1;
                }
            }
        }
        _ => {
            println!("  ❌ Ollama not reachable at {}", ollama.base_url());
            issues += 1;
        }
    }

    let client = Client::new(&config.server.socket_path);
    match client.stream(&Request::new(RequestKind::Stats, ""), |_| {}).await {
        Ok(stats) => println!("  ✅ Server on {}: {stats}", config.server.socket_path.display()),
        Err(_) => {
            println!(
                "  ⚠️  No server on {}; start one with `kiln serve`",
                config.server.socket_path.display()
            );
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
