use anyhow::Context;
use flashcard_engine::api::{app_router, ApiState};
use flashcard_engine::app::App;
use flashcard_engine::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = App::new(&config).await?;
    log::info!(
        "loaded {} decks from {}",
        app.session.decks().count(),
        config.database_url
    );

    let router = app_router(ApiState::new(app));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    log::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, router).await?;
    Ok(())
}
