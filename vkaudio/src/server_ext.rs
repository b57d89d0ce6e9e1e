//! Extension de vkserver::Server pour monter le proxy VK
//!
//! `vkserver` reste un serveur HTTP générique : c'est `vkaudio` qui construit
//! la session, le cache, la recherche et le téléchargement, puis enregistre
//! ses routes à la racine du serveur.

use crate::api_rest::{VkState, create_router};
use crate::cache::VkCache;
use crate::config_ext::VkSettings;
use crate::download::Downloader;
use crate::search::VkClient;
use crate::session::VkSession;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Trait d'extension pour ajouter le proxy VK à un serveur vkserver
///
/// # Exemple
///
/// ```rust,no_run
/// use vkaudio::VkServerExt;
/// use vkserver::ServerBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut server = ServerBuilder::new_configured().build();
///     server.init_vk_proxy_configured().await?;
///
///     server.start().await?;
///     server.wait().await;
///     Ok(())
/// }
/// ```
pub trait VkServerExt {
    /// Construit les composants depuis `settings` et enregistre les routes
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /search` - Recherche (query params: q, page, captcha_sid, captcha_key)
    /// - `GET /dl/{key}/{id}` - Téléchargement
    /// - `GET /stream/{key}/{id}` - Écoute progressive
    /// - `POST /_auth` - Authentification
    /// - `POST /_auth_second_factor` - Vérification de sécurité
    async fn init_vk_proxy(&mut self, settings: VkSettings) -> Result<VkState>;

    /// Comme [`Self::init_vk_proxy`], avec la configuration globale
    async fn init_vk_proxy_configured(&mut self) -> Result<VkState>;
}

impl VkServerExt for vkserver::Server {
    async fn init_vk_proxy(&mut self, settings: VkSettings) -> Result<VkState> {
        let session = Arc::new(VkSession::from_settings(&settings.session)?);
        let cache = VkCache::new(&settings.cache);
        let downloader = Arc::new(Downloader::new(cache.clone(), &settings)?);
        let client = Arc::new(VkClient::new(session, cache, &settings));

        let state = VkState {
            client,
            downloader,
            public_base_url: settings.public_base_url.clone(),
        };
        self.add_router("/", create_router(state.clone())).await;
        info!("VK proxy routes registered");

        Ok(state)
    }

    async fn init_vk_proxy_configured(&mut self) -> Result<VkState> {
        let config = vkconfig::get_config();
        let settings = VkSettings::from_config(&config)?;
        self.init_vk_proxy(settings).await
    }
}
