//! Pipeline de téléchargement et d'écoute
//!
//! Un morceau est identifié par le couple (clé de recherche, identifiant).
//! Le fichier local, nommé par hash de l'identifiant, fait foi : s'il existe
//! il a déjà été téléchargé et validé. Sinon la fiche du morceau est
//! retrouvée dans le cache, l'URL amont téléchargée dans un fichier `.part`,
//! validée, taguée puis renommée.
//!
//! Un seul téléchargement par identifiant est en cours à un instant donné :
//! les requêtes concurrentes attendent le premier puis servent son fichier.

use crate::cache::VkCache;
use crate::config_ext::VkSettings;
use crate::error::{Result, VkError};
use crate::media::{self, CHUNK_SIZE, MediaFile, MediaValidator};
use crate::models::AudioItem;
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use vkutils::{HashKind, uni_hash};

type InflightMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Verrou d'un identifiant, libéré et nettoyé au drop
struct InflightGuard<'a> {
    key: String,
    inflight: &'a InflightMap,
    _lock: OwnedMutexGuard<()>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        // Le map et ce garde : personne d'autre n'attend
        if inflight
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) <= 2)
        {
            inflight.remove(&self.key);
        }
    }
}

/// Résout et télécharge les fichiers média
pub struct Downloader {
    client: Client,
    cache: VkCache,
    validator: MediaValidator,
    directory: PathBuf,
    mp3_hash: HashKind,
    inflight: InflightMap,
}

impl Downloader {
    pub fn new(cache: VkCache, settings: &VkSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.download.directory)?;
        let client = Client::builder().timeout(settings.download.timeout).build()?;

        Ok(Self {
            client,
            cache,
            validator: MediaValidator::new(&settings.download),
            directory: settings.download.directory.clone(),
            mp3_hash: settings.hash.mp3,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Chemin local du fichier d'un morceau
    pub fn file_path(&self, item_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.mp3", uni_hash(self.mp3_hash, item_id)))
    }

    /// Nombre d'identifiants ayant un téléchargement en cours ou en attente
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    async fn lock(&self, key: &str) -> InflightGuard<'_> {
        let entry = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        InflightGuard {
            key: key.to_string(),
            inflight: &self.inflight,
            _lock: entry.lock_owned().await,
        }
    }

    /// Fiche d'un morceau : région des fiches, puis page de recherche
    ///
    /// Une fiche retrouvée dans une page est recopiée dans la région des fiches.
    async fn find_item(&self, cache_key: &str, item_id: &str) -> Option<AudioItem> {
        if let Some(item) = self.cache.get_audio_info(item_id).await {
            return Some(item);
        }

        let item = self.cache.find_in_search(cache_key, item_id).await?;
        self.cache.put_audio_info(item.clone()).await;
        Some(item)
    }

    /// Fichier local validé du morceau `item_id`, téléchargé si nécessaire
    pub async fn resolve(&self, cache_key: &str, item_id: &str, streaming: bool) -> Result<MediaFile> {
        let path = self.file_path(item_id);
        let _guard = self.lock(item_id).await;

        if tokio::fs::try_exists(&path).await? {
            debug!("Audio file already exists: {}", path.display());
            let file_name = match self.find_item(cache_key, item_id).await {
                Some(item) => item.display_name(),
                None => format!("{}.mp3", item_id),
            };
            self.validator.validate(&path).await?;
            return MediaFile::open(path, file_name).await;
        }

        let item = self
            .find_item(cache_key, item_id)
            .await
            .ok_or_else(|| VkError::NotFound(format!("audio {}", item_id)))?;
        let url = item
            .playable_url()
            .ok_or_else(|| VkError::NotFound(format!("audio {}: undecodable URL", item_id)))?;

        info!(
            "Downloading {} - {} [streaming={}]",
            item.artist, item.title, streaming
        );
        self.fetch(&url, &item, &path).await?;
        MediaFile::open(path, item.display_name()).await
    }

    /// Télécharge, valide, tague puis publie le fichier
    async fn fetch(&self, url: &str, item: &AudioItem, path: &Path) -> Result<()> {
        let part = path.with_extension("mp3.part");

        if let Err(e) = self.fetch_to(url, &part).await {
            warn!("Download of {} failed: {}", item.id, e);
            match tokio::fs::remove_file(&part).await {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                    warn!("Failed to remove {}: {}", part.display(), err);
                }
                _ => {}
            }
            return Err(e);
        }

        self.validator.validate(&part).await?;
        media::write_tags(&part, item).await;
        tokio::fs::rename(&part, path).await?;
        Ok(())
    }

    async fn fetch_to(&self, url: &str, part: &Path) -> Result<()> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;

        let file = tokio::fs::File::create(part).await?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        debug!("Downloaded {} bytes to {}", written, part.display());
        Ok(())
    }
}
