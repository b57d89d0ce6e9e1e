//! Utilitaires partagés par les crates VKAudio.
//!
//! - [`hash`] : dérivation de clés déterministes (cache, identifiants, noms de fichiers)
//! - [`sanitize`] : nettoyage des noms de fichiers présentés au client
//!
//! # Examples
//!
//! ```
//! use vkutils::{uni_hash, HashKind};
//!
//! let key = uni_hash(HashKind::Crc32, "Coldplay.0");
//! assert_eq!(key, "4fe42a16");
//! ```

pub mod hash;
mod sanitize;

pub use hash::{HashKind, crc32, md5, uni_hash};
pub use sanitize::sanitize;
