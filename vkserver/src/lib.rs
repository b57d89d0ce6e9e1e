//! # vkserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit l'hébergement HTTP de VKAudio :
//!
//! - [`server`] : le serveur principal et son builder, arrêt gracieux sur Ctrl+C
//! - [`logs`] : initialisation du tracing avec un niveau rechargeable à chaud
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use vkserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "http://localhost:8080", 8080).build();
//!
//!     server
//!         .add_router("/", Router::new().route("/ping", get(|| async { "pong" })))
//!         .await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, create_logs_router, init_logging};
pub use server::{Server, ServerBuilder, ServerInfo};
