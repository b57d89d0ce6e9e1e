//! Cache en mémoire des résultats amont
//!
//! Deux régions indépendantes :
//!
//! - les pages de recherche, clé = hash(`"{requête}.{page}"`), avec TTL ;
//! - les fiches des morceaux, clé = identifiant du morceau, sans expiration
//!   par défaut et recopiées en JSON sur disque pour survivre à un redémarrage.
//!
//! `get` rend `None` pour une clé absente ou expirée, `put` écrase toujours.
//! Deux recherches concurrentes sur la même clé peuvent toutes deux écrire :
//! la dernière gagne.

use crate::config_ext::CacheSettings;
use crate::models::AudioItem;
use moka::future::Cache as MokaCache;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache principal du proxy
///
/// # Exemple
///
/// ```
/// use std::time::Duration;
/// use vkaudio::config_ext::CacheSettings;
/// use vkaudio::VkCache;
///
/// # tokio_test::block_on(async {
/// let cache = VkCache::new(&CacheSettings {
///     search_ttl: Duration::from_secs(60),
///     search_capacity: 100,
///     audio_info_ttl: None,
///     audio_info_dir: None,
/// });
/// cache.put_search("4fe42a16".into(), Vec::new()).await;
/// assert!(cache.get_search("4fe42a16").await.is_some());
/// # });
/// ```
#[derive(Clone)]
pub struct VkCache {
    /// Pages de recherche brutes (avant classement)
    search_pages: Arc<MokaCache<String, Arc<Vec<AudioItem>>>>,
    /// Fiches des morceaux
    audio_info: Arc<MokaCache<String, AudioItem>>,
    /// Copie disque de la région des fiches
    audio_info_dir: Option<PathBuf>,
}

impl VkCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let search_pages = MokaCache::builder()
            .max_capacity(settings.search_capacity)
            .time_to_live(settings.search_ttl)
            .build();

        let mut audio_info = MokaCache::builder().max_capacity(settings.search_capacity * 10);
        if let Some(ttl) = settings.audio_info_ttl {
            audio_info = audio_info.time_to_live(ttl);
        }

        if let Some(dir) = &settings.audio_info_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Cannot create audio info directory {}: {}", dir.display(), e);
            }
        }

        Self {
            search_pages: Arc::new(search_pages),
            audio_info: Arc::new(audio_info.build()),
            audio_info_dir: settings.audio_info_dir.clone(),
        }
    }

    // ============ Pages de recherche ============

    /// Récupère une page de recherche depuis le cache
    pub async fn get_search(&self, key: &str) -> Option<Arc<Vec<AudioItem>>> {
        let hit = self.search_pages.get(key).await;
        debug!("Search cache {} for {}", if hit.is_some() { "hit" } else { "miss" }, key);
        hit
    }

    /// Ajoute une page de recherche au cache, même vide
    pub async fn put_search(&self, key: String, items: Vec<AudioItem>) {
        self.search_pages.insert(key, Arc::new(items)).await;
    }

    /// Cherche un morceau dans une page de recherche
    pub async fn find_in_search(&self, key: &str, id: &str) -> Option<AudioItem> {
        self.search_pages
            .get(key)
            .await?
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    pub async fn invalidate_search(&self, key: &str) {
        self.search_pages.invalidate(key).await;
    }

    // ============ Fiches ============

    /// Récupère une fiche, en mémoire puis sur disque
    pub async fn get_audio_info(&self, id: &str) -> Option<AudioItem> {
        if let Some(item) = self.audio_info.get(id).await {
            return Some(item);
        }

        let path = self.audio_info_path(id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read audio info {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<AudioItem>(&data) {
            Ok(item) => {
                debug!("Audio info {} restored from disk", id);
                self.audio_info.insert(id.to_string(), item.clone()).await;
                Some(item)
            }
            Err(e) => {
                warn!("Corrupted audio info {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Enregistre une fiche, en mémoire et sur disque
    pub async fn put_audio_info(&self, item: AudioItem) {
        if let Some(path) = self.audio_info_path(&item.id) {
            match serde_json::to_vec(&item) {
                Ok(json) => {
                    if let Err(e) = tokio::fs::write(&path, json).await {
                        warn!("Cannot write audio info {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Cannot serialize audio info {}: {}", item.id, e),
            }
        }
        self.audio_info.insert(item.id.clone(), item).await;
    }

    /// Fichier disque d'une fiche ; `None` sans copie disque ou pour un
    /// identifiant qui ne pourrait pas servir de nom de fichier
    fn audio_info_path(&self, id: &str) -> Option<PathBuf> {
        let dir = self.audio_info_dir.as_ref()?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(dir.join(format!("{}.json", id)))
    }

    // ============ Maintenance ============

    /// Retourne des statistiques sur le cache
    pub async fn stats(&self) -> CacheStats {
        self.search_pages.run_pending_tasks().await;
        self.audio_info.run_pending_tasks().await;

        CacheStats {
            search_pages_count: self.search_pages.entry_count(),
            audio_info_count: self.audio_info.entry_count(),
        }
    }
}

/// Statistiques du cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub search_pages_count: u64,
    pub audio_info_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(dir: Option<PathBuf>) -> CacheSettings {
        CacheSettings {
            search_ttl: Duration::from_secs(60),
            search_capacity: 100,
            audio_info_ttl: None,
            audio_info_dir: dir,
        }
    }

    fn item(id: &str) -> AudioItem {
        AudioItem {
            id: id.to_string(),
            artist: "Coldplay".to_string(),
            title: "Yellow".to_string(),
            duration: 269,
            mp3: "https://cs1.example.com/yellow.mp3".to_string(),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_search_region() {
        let cache = VkCache::new(&settings(None));
        assert!(cache.get_search("k").await.is_none());

        cache.put_search("k".into(), vec![item("a1"), item("b2")]).await;
        assert_eq!(cache.get_search("k").await.unwrap().len(), 2);
        assert_eq!(cache.find_in_search("k", "b2").await.unwrap().id, "b2");
        assert!(cache.find_in_search("k", "zz").await.is_none());

        // Une page vide est une entrée valide, distincte d'un miss
        cache.put_search("empty".into(), Vec::new()).await;
        assert!(cache.get_search("empty").await.unwrap().is_empty());

        cache.invalidate_search("k").await;
        assert!(cache.get_search("k").await.is_none());
    }

    #[tokio::test]
    async fn test_search_ttl_expires() {
        let mut s = settings(None);
        s.search_ttl = Duration::from_millis(50);
        let cache = VkCache::new(&s);

        cache.put_search("k".into(), vec![item("a1")]).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get_search("k").await.is_none());
    }

    #[tokio::test]
    async fn test_audio_info_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VkCache::new(&settings(Some(dir.path().to_path_buf())));
        cache.put_audio_info(item("4fe42a16")).await;
        assert!(dir.path().join("4fe42a16.json").exists());

        let restarted = VkCache::new(&settings(Some(dir.path().to_path_buf())));
        assert_eq!(restarted.get_audio_info("4fe42a16").await, Some(item("4fe42a16")));
        assert_eq!(restarted.stats().await.audio_info_count, 1);
    }

    #[tokio::test]
    async fn test_audio_info_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VkCache::new(&settings(Some(dir.path().join("info"))));
        std::fs::write(dir.path().join("secret.json"), b"{}").unwrap();

        assert!(cache.get_audio_info("../secret").await.is_none());
        assert!(cache.get_audio_info("").await.is_none());
    }
}
