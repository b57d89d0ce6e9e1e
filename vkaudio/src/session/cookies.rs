//! Cookie jar persistant branché sur reqwest
//!
//! Le `Jar` de reqwest ne se sérialise pas : on passe par `cookie_store`,
//! partagé avec le client via `reqwest_cookie_store`, et enregistré en JSON,
//! un fichier par identité.

use crate::error::{Result, VkError};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Arc, MutexGuard};
use tracing::debug;

/// Magasin de cookies sérialisable, partagé avec le client HTTP
#[derive(Debug, Clone)]
pub struct PersistentJar {
    store: Arc<CookieStoreMutex>,
}

impl Default for PersistentJar {
    fn default() -> Self {
        Self::from_store(CookieStore::default())
    }
}

impl PersistentJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_store(store: CookieStore) -> Self {
        Self {
            store: Arc::new(CookieStoreMutex::new(store)),
        }
    }

    /// Fournisseur de cookies à donner à `reqwest::ClientBuilder`
    pub fn provider(&self) -> Arc<CookieStoreMutex> {
        self.store.clone()
    }

    /// Charge un jar depuis le disque, cookies de session compris
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let store = cookie_store::serde::json::load_all(reader)
            .map_err(|e| VkError::Other(format!("Invalid cookie jar: {}", e)))?;

        debug!("Loaded cookie jar from {}", path.display());
        Ok(Self::from_store(store))
    }

    /// Enregistre les cookies persistants et de session
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        let store = self.lock();
        cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut writer)
            .map_err(|e| VkError::Other(format!("Cannot write cookie jar: {}", e)))?;

        debug!("Saved cookie jar to {}", path.display());
        Ok(())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Nombre de cookies encore valides
    pub fn len(&self) -> usize {
        self.lock().iter_unexpired().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CookieStore> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore as _;
    use reqwest::header::HeaderValue;
    use std::collections::BTreeSet;
    use url::Url;

    fn set(jar: &PersistentJar, url: &str, headers: &[&str]) {
        let values: Vec<HeaderValue> = headers
            .iter()
            .map(|h| HeaderValue::from_str(h).unwrap())
            .collect();
        jar.provider()
            .set_cookies(&mut values.iter(), &Url::parse(url).unwrap());
    }

    /// Cookies envoyés à `url`, sans dépendre de leur ordre
    fn sent(jar: &PersistentJar, url: &str) -> BTreeSet<String> {
        jar.provider()
            .cookies(&Url::parse(url).unwrap())
            .map(|h| {
                h.to_str()
                    .unwrap()
                    .split("; ")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_only_and_domain_cookies() {
        let jar = PersistentJar::new();
        set(
            &jar,
            "https://m.vk.com/login",
            &["remixsid=abc; Path=/; HttpOnly", "remixlang=3; Domain=.vk.com"],
        );

        assert_eq!(
            sent(&jar, "https://m.vk.com/feed"),
            names(&["remixsid=abc", "remixlang=3"])
        );
        assert_eq!(sent(&jar, "https://login.vk.com/"), names(&["remixlang=3"]));
        assert!(sent(&jar, "https://example.com/").is_empty());
    }

    #[test]
    fn test_expired_cookie_deletes_existing() {
        let jar = PersistentJar::new();
        set(&jar, "https://m.vk.com/", &["remixsid=abc"]);
        set(
            &jar,
            "https://m.vk.com/",
            &["remixsid=DELETED; expires=Thu, 01 Jan 1970 00:00:01 GMT"],
        );
        assert!(jar.is_empty());
    }

    #[test]
    fn test_foreign_domain_is_rejected() {
        let jar = PersistentJar::new();
        set(&jar, "https://m.vk.com/", &["evil=1; Domain=example.com"]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_save_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jar");

        let jar = PersistentJar::new();
        set(&jar, "http://127.0.0.1:8080/", &["remixsid=abc"]);
        jar.save(&path).unwrap();

        let loaded = PersistentJar::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            sent(&loaded, "http://127.0.0.1:8080/feed"),
            names(&["remixsid=abc"])
        );

        loaded.clear();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jar");
        std::fs::write(&path, b"not json").unwrap();
        assert!(PersistentJar::load(&path).is_err());
    }
}
