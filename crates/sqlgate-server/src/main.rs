//! SQLGate server
//!
//! Mediates access to the school database: accepts candidate SQL statements
//! over HTTP, validates them against the role-based permission policy, and
//! returns the (possibly rewritten) statement for the external executor to
//! run. A malformed policy aborts startup; per-request failures always
//! resolve to a denial.

use sqlgate_engine::ValidationEngine;
use sqlgate_policy::{PolicyStore, StaticIdentityResolver};
use std::sync::Arc;
use tracing::info;

mod config;
mod http;
mod llm;
mod logging;

use config::{Config, ConfigError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("SQLGATE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    // Built-in defaults apply only when no config file exists. A file that
    // is present but malformed is fatal: falling back silently could flip
    // the extractor mode or point at the wrong policy.
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("Config file {config_path} not found. Using defaults.");
            Config::default()
        }
        Err(err) => return Err(err.into()),
    };

    config.apply_logging_env();
    logging::init();

    // Policy is loaded once; a malformed document is fatal, never partial.
    let policy = Arc::new(PolicyStore::load(&config.policy_path)?);
    info!(
        path = %config.policy_path,
        rules = policy.rule_count(),
        "permission policy loaded"
    );

    let mut engine = ValidationEngine::new(policy);
    if config.extractor.mode == "semantic" {
        let api_key = Config::get_openai_api_key()?;
        let openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        let client = async_openai::Client::with_config(openai_config);
        engine = engine.with_primary(Box::new(llm::SemanticExtractor::new(
            client,
            config.extractor.model.as_str(),
            config.extractor.timeout_secs,
        )));
        info!(model = %config.extractor.model, "semantic extractor enabled");
    } else {
        info!("pattern extractor only (semantic mode disabled)");
    }

    let state = http::AppState {
        engine: Arc::new(engine),
        resolver: Arc::new(StaticIdentityResolver::new(config.users.clone())),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(%addr, "starting SQLGate server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
