use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use api_shared::ApiKeyAuth;
use opal_core::config::{
    episode_ids_from_env_value, integration_mode_from_env_value, path_from_env_value,
};
use opal_core::{CoreConfig, SubrecordController};

/// Main entry point for the OPAL subrecord service
///
/// Resolves configuration from the environment once, wires the subrecord controller and serves
/// the REST API until interrupted.
///
/// # Environment Variables
/// - `OPAL_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `OPAL_DATA_DIR`: Directory for JSON record files (default: in-memory storage)
/// - `OPAL_SCHEMA_FILE`: YAML record schema (default: built-in schema)
/// - `OPAL_USERS_FILE`: YAML user profiles (default: every user gets the default profile)
/// - `OPAL_LISTINGS_FILE`: YAML patient lists and client flows (default: one list of every record
///   type, no flows)
/// - `OPAL_INTEGRATION`: `log` (default), `off`, or `jsonl:<path>`
/// - `OPAL_EPISODES`: Comma-separated episode ids that exist at startup
/// - `API_KEY`: API key required in the `x-api-key` header
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - any configuration value is invalid or `API_KEY` is unset,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("opal=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("OPAL_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let api_key = std::env::var("API_KEY")
        .map_err(|_| anyhow::anyhow!("API_KEY must be set for the REST API"))?;

    let cfg = CoreConfig::new(
        path_from_env_value(std::env::var("OPAL_DATA_DIR").ok()),
        path_from_env_value(std::env::var("OPAL_SCHEMA_FILE").ok()),
        path_from_env_value(std::env::var("OPAL_USERS_FILE").ok()),
        path_from_env_value(std::env::var("OPAL_LISTINGS_FILE").ok()),
        integration_mode_from_env_value(std::env::var("OPAL_INTEGRATION").ok())?,
        episode_ids_from_env_value(std::env::var("OPAL_EPISODES").ok())?,
    )?;
    let controller = SubrecordController::from_config(&cfg)?;

    tracing::info!(
        "++ Serving {} record types",
        controller.records().descriptors().count()
    );
    tracing::info!("++ Starting OPAL REST on {}", rest_addr);

    let app = api_rest::router(AppState::new(controller, ApiKeyAuth::new(api_key)));

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}
