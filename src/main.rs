mod app;
mod audit;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod events;
mod form;
mod jobs;
mod mailer;
mod participants;
mod rate_limit;
mod state;
mod storage;
mod students;
mod users;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "eventhub=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    sqlx::migrate!("./migrations").run(&app_state.db).await?;

    rate_limit::spawn_sweeper(app_state.clone());
    jobs::spawn_token_cleanup(app_state.clone());

    let addr = app_state.config.listen_addr()?;
    let app = app::build_app(app_state);
    app::serve(app, addr).await
}
