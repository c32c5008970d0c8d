mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use distillery_learning::{EmbeddingConfig, EmbeddingProvider, HttpEmbeddingProvider};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(distillery_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let registry = distillery_core::load_industries(&config.industries_path)?;
    tracing::info!(
        industries = registry.len(),
        path = %config.industries_path.display(),
        "industry configuration loaded"
    );

    let pool_config = distillery_db::PoolConfig::from_app_config(&config);
    let pool = distillery_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = distillery_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations complete");

    let provider: Option<Arc<dyn EmbeddingProvider>> =
        match EmbeddingConfig::from_app_config(&config) {
            Some(embedding) => Some(Arc::new(HttpEmbeddingProvider::new(&embedding)?)),
            None => {
                tracing::warn!("no embedding provider configured; matching is keyword-only");
                None
            }
        };

    let store = Arc::new(distillery_db::PgStore::new(pool));
    let state = AppState::from_store(store, &config, &registry, provider)?;
    tracing::info!(
        distillation = state.enricher.engine().is_enabled(),
        semantic_matching = state.training.matcher().has_provider(),
        "services ready"
    );

    let _scheduler = scheduler::build_scheduler(
        state.enricher.scrapes().clone(),
        Arc::clone(&state.training),
        &config.sweep_cron,
        &config.decay_cron,
    )
    .await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        distillery_core::Environment::Development
    ))?;
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "distillery server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
