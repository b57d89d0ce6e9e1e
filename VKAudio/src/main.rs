use axum::{Json, Router, extract::State, routing::get};
use tracing::{info, warn};
use vkaudio::{VkServerExt, VkState};
use vkserver::Server;

/// Version et état du cache
async fn server_info(State(state): State<VkState>) -> Json<serde_json::Value> {
    let stats = state.client.cache().stats().await;
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "cache": {
            "search_pages": stats.search_pages_count,
            "audio_info": stats.audio_info_count,
        },
        "downloads_in_flight": state.downloader.inflight_count(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure ==========

    let mut server = Server::new_configured();
    server.init_logging().await;

    // ========== PHASE 2 : Proxy VK ==========

    info!("🎵 Initializing VK proxy...");
    let state = server.init_vk_proxy_configured().await?;

    server
        .add_router(
            "/",
            Router::new()
                .route("/info", get(server_info))
                .with_state(state.clone()),
        )
        .await;

    // Connexion anticipée : un échec n'empêche pas le démarrage,
    // l'authentification reste possible via POST /_auth
    let session = state.client.session().clone();
    tokio::spawn(async move {
        match session.authenticate().await {
            Ok(outcome) => info!("Initial VK authentication: {:?}", outcome),
            Err(e) => warn!("⚠️ Initial VK authentication failed: {}", e),
        }
    });

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    info!("✅ VKAudio is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    Ok(())
}
