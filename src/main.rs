use outfit_service::{config::Config, routes, state::AppState};
use tokio::{net::TcpListener, signal::ctrl_c};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    let address = format!("0.0.0.0:{}", config.port);

    info!("Opening store at {}", config.store_path.display());
    let state = AppState::new(config).await?;
    let app = routes::router(state);

    let listener = TcpListener::bind(&address).await?;
    info!("Outfit service running on http://{address}");
    info!("Endpoints:");
    info!("   POST   /users               - Register");
    info!("   POST   /sessions            - Log in");
    info!("   POST   /items               - Upload an item (multipart: category, file)");
    info!("   GET    /items               - List items");
    info!("   POST   /suggestions         - Suggest an outfit");
    info!("   POST   /dislikes, /favorites - Record feedback");
    info!("   POST   /backups             - Download a backup");
    info!("   POST   /backups/restore     - Restore a backup");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
