use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};
use std::env;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use h5pbank_runtime::{capability::SYSTEM_CONTEXT, config::Config, contentbank::Registry, db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "h5pbank_runtime=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let pool = db::connect(&config.database_url).await?;
    let registry = Registry::with_defaults()?;
    tracing::info!(
        contenttypes = registry.handlers(SYSTEM_CONTEXT).len(),
        site_admins = config.site_admins.len(),
        "content bank ready"
    );
    let state = AppState::new(pool, &config, registry);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
