use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boxoffice::config::{Config, Settings};
use boxoffice::engine::{sweeper, EngineDeps};
use boxoffice::external::{LogHookDispatcher, LogNotificationSink, PgSequenceProvider};
use boxoffice::payment::AutoApproveGateway;
use boxoffice::routes::create_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Migrations run successfully");

    let deps = EngineDeps {
        pool: pool.clone(),
        gateway: Arc::new(AutoApproveGateway),
        notifications: Arc::new(LogNotificationSink),
        hooks: Arc::new(LogHookDispatcher),
        sequences: Arc::new(PgSequenceProvider::new(pool.clone())),
        settings: Settings::new(pool),
    };

    let _scheduler = sweeper::start_scheduler(deps.clone()).await?;

    let app: Router = create_routes(deps);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.bind_port));
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
