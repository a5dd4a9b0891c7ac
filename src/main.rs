//! Backend entry point: configuration, tracing, the pinned base prompt,
//! the store, and the warp server.

mod chat;
mod config;
mod error;
mod gateway;
mod policy;
mod prefs;
mod prompt;
mod sanitize;
mod server;
mod store;
mod tools;

use anyhow::Context;
use config::AppConfig;
use prompt::BaseSystemPrompt;
use server::AppState;
use store::Store;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stdout))
        .with_ansi(false)
        .init();

    tracing::info!("backend_startup");

    // Fatal on hash mismatch: refuse to serve with a drifted prompt.
    let base_prompt =
        BaseSystemPrompt::load(&config.base_prompt_path, &config.base_prompt_sha256_path)?;
    tracing::info!(
        sha256 = %base_prompt.sha256,
        path = %config.base_prompt_path.display(),
        "base system prompt loaded"
    );

    let store = Store::open(&config.db_path).await?;
    tracing::info!(db = %config.db_path.display(), "store ready");

    let bind_addr = config.bind_addr;
    let state = AppState::new(store, config, base_prompt);
    let routes = server::routes(state);

    tracing::info!(addr = %bind_addr, "backend listening");
    warp::serve(routes).run(bind_addr).await;
    Ok(())
}
