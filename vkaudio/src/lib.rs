//! # vkaudio - Proxy de recherche et de téléchargement audio VK
//!
//! Cette crate se fait passer pour un navigateur connecté au site mobile VK
//! afin de rechercher des morceaux et d'en servir les fichiers.
//!
//! ## Vue d'ensemble
//!
//! - `session` : identité amont, jar de cookies persistant, connexion et
//!   vérifications de sécurité (2FA)
//! - `decode` : déchiffrement des URL média obfusquées
//! - `cache` : pages de recherche (TTL) et fiches des morceaux (sur disque)
//! - `search` : recherche, extraction (`scrape`) et classement (`rank`)
//! - `download` : téléchargement unique par morceau, validation (`media`)
//!   et service des fichiers
//! - `api_rest` : routes HTTP (feature `vkserver`)
//!
//! ## Structure des modules
//!
//! ```text
//! vkaudio/
//! ├── src/
//! │   ├── lib.rs              # Module principal (ce fichier)
//! │   ├── config_ext.rs       # Options et instantané de configuration
//! │   ├── error.rs            # Gestion des erreurs
//! │   ├── models.rs           # Structures de données
//! │   ├── decode.rs           # Déchiffrement des URL
//! │   ├── session/
//! │   │   ├── mod.rs          # Machine à états de la session
//! │   │   ├── cookies.rs      # Jar de cookies persistant
//! │   │   └── page.rs         # Lecture des formulaires de connexion
//! │   ├── cache.rs            # Cache à deux régions
//! │   ├── scrape.rs           # Extraction des pages de listes
//! │   ├── rank.rs             # Classement des résultats
//! │   ├── search.rs           # Pipeline de recherche
//! │   ├── media.rs            # Validation, tags, en-têtes
//! │   ├── download.rs         # Pipeline de téléchargement
//! │   ├── api_rest.rs         # Handlers HTTP
//! │   └── server_ext.rs       # Extension de vkserver::Server
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vkaudio::{VkCache, VkClient, VkSession, VkSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = VkSettings::from_config(&vkconfig::get_config())?;
//!     let session = Arc::new(VkSession::from_settings(&settings.session)?);
//!     session.authenticate().await?.into_result()?;
//!
//!     let client = VkClient::new(session, VkCache::new(&settings.cache), &settings);
//!     for item in client.search("Coldplay", 0, None, "http://localhost:8000").await? {
//!         println!("{} - {} ({}s)", item.artist, item.title, item.duration);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config_ext;
pub mod decode;
pub mod download;
pub mod error;
pub mod media;
pub mod models;
pub mod rank;
pub mod scrape;
pub mod search;
pub mod session;

#[cfg(feature = "vkserver")]
pub mod api_rest;

#[cfg(feature = "vkserver")]
pub mod server_ext;

pub use cache::{CacheStats, VkCache};
pub use config_ext::{VkAccount, VkConfigExt, VkSettings};
pub use decode::decrypt;
pub use download::Downloader;
pub use error::{Captcha, Result, VkError};
pub use media::MediaFile;
pub use models::{AudioItem, CaptchaAnswer, RankedAudioItem};
pub use search::VkClient;
pub use session::{AuthFailure, AuthOutcome, VkSession};

#[cfg(feature = "vkserver")]
pub use api_rest::{VkState, create_router};

#[cfg(feature = "vkserver")]
pub use server_ext::VkServerExt;
