use dotenvy::dotenv;
use std::{env, net::SocketAddr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forum_quickmod::{
    db::{connect_pool, DbConfig},
    http::{router, settings_from_env, AppState},
    services::InMemoryService,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    let db = match DbConfig::from_env() {
        Ok(config) => Some(connect_pool(&config).expect("failed to configure postgres pool")),
        Err(err) => {
            warn!(error = %err, "running without a database");
            None
        }
    };

    let forum = InMemoryService::new_with_sample();
    match env::var("SESSION_SECRET") {
        Ok(secret) => forum.set_session_secret(&secret),
        Err(_) => warn!("SESSION_SECRET not set; using the built-in development secret"),
    }
    let settings = settings_from_env();
    info!(?settings, "moderation settings loaded");
    let app = router(AppState::new(db, forum, settings));

    let addr: SocketAddr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".into())
        .parse()
        .expect("invalid BIND_ADDR, expected host:port");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind HTTP listener");
    info!("API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server crashed");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    }
}
