//! Pipeline de recherche
//!
//! Une recherche lit d'abord la région des pages du cache. En cas d'absence,
//! elle interroge une ou plusieurs pages de liste amont via la session,
//! extrait les morceaux, déchiffre leurs URL, met la liste brute en cache
//! puis la classe. Les liens renvoyés pointent vers ce service et jamais
//! vers l'URL amont.

use crate::cache::VkCache;
use crate::config_ext::{HashSettings, SearchSettings, VkSettings};
use crate::decode::{self, ENCRYPTED_MARKER};
use crate::error::{Result, VkError};
use crate::models::{AudioItem, CaptchaAnswer, RankedAudioItem};
use crate::rank::Ranker;
use crate::scrape::{self, Listing, RawItem};
use crate::session::VkSession;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vkutils::{md5, uni_hash};

/// Code d'erreur amont d'une demande de captcha
pub const CAPTCHA_ERROR_CODE: u16 = 14;

/// Artistes tirés au sort pour une requête vide
pub const ARTISTS: &[&str] = &[
    "2 Cellos", "Agnes Obel", "Aloe Black", "Andrew Belle", "Angus Stone", "Aquilo",
    "Arctic Monkeys", "Avicii", "Balmorhea", "Barcelona", "Bastille", "Ben Howard", "Benj Heard",
    "Birdy", "Broods", "Calvin Harris", "Charlotte OC", "City of The Sun", "Civil Twilight",
    "Clint Mansel", "Coldplay", "Daft Punk", "Damien Rice", "Daniela Andrade", "Daughter",
    "David O'Dowda", "Dawn Golden", "Dirk Maassen", "Ed Sheeran", "Eminem", "Fabrizio Paterlini",
    "Fink", "Fleurie", "Florence and The Machine", "Gem club", "Glass Animals", "Greg Haines",
    "Greg Maroney", "Groen Land", "Halsey", "Hans Zimmer", "Hozier", "Imagine Dragons",
    "Ingrid Michaelson", "Jamie XX", "Jarryd James", "Jasmin Thompson", "Jaymes Young",
    "Jessie J", "Josef Salvat", "Julia Kent", "Kai Engel", "Keaton Henson", "Kendra Logozar",
    "Kina Grannis", "Kodaline", "Kygo", "Kyle Landry", "Lana Del Rey", "Lera Lynn",
    "Lights & Motion", "Linus Young", "Lo-Fang", "Lorde", "Ludovico Einaudi", "M83", "MONO",
    "MS MR", "Macklemore", "Mammals", "Maroon 5", "Martin Garrix", "Mattia Cupelli",
    "Max Richter", "Message To Bears", "Mogwai", "Mumford & Sons", "Nils Frahm", "ODESZA",
    "Of Monsters and Men", "Oh Wonder", "Philip Glass", "Phoebe Ryan", "Rachel Grimes",
    "Radiohead", "Ryan Keen", "Sam Smith", "Seinabo Sey", "Sia", "Takahiro Kido",
    "The Irrepressibles", "The Neighbourhood", "The xx", "VLNY", "Wye Oak", "X ambassadors",
    "Yann Tiersen", "Yiruma", "Young Summer", "Zack Hemsey", "Zinovia", "deadmau5", "pg.lost",
    "Ólafur Arnalds", "Oasis",
];

/// Client de recherche partagé par toutes les requêtes
pub struct VkClient {
    session: Arc<VkSession>,
    cache: VkCache,
    ranker: Ranker,
    settings: SearchSettings,
    hash: HashSettings,
}

impl VkClient {
    pub fn new(session: Arc<VkSession>, cache: VkCache, settings: &VkSettings) -> Self {
        Self {
            session,
            cache,
            ranker: Ranker::new(
                settings.search.sort_regex.clone(),
                settings.search.bad_words_regex.clone(),
            ),
            settings: settings.search.clone(),
            hash: settings.hash,
        }
    }

    pub fn session(&self) -> &Arc<VkSession> {
        &self.session
    }

    pub fn cache(&self) -> &VkCache {
        &self.cache
    }

    /// Clé de cache d'une page de résultats
    ///
    /// Une requête vide est remplacée par `md5("random")`.
    pub fn cache_key(&self, query: &str, page: u32) -> String {
        let query = if query.is_empty() {
            md5("random")
        } else {
            query.to_string()
        };
        uni_hash(self.hash.cache, format!("{}.{}", query, page))
    }

    /// Recherche `query` et renvoie la page `page` classée
    ///
    /// `base_url` préfixe les liens de téléchargement et d'écoute.
    pub async fn search(
        &self,
        query: &str,
        page: u32,
        captcha: Option<&CaptchaAnswer>,
        base_url: &str,
    ) -> Result<Vec<RankedAudioItem>> {
        let (key, items) = self.search_items(query, page, captcha).await?;
        let base_url = base_url.trim_end_matches('/');

        Ok(self.ranker.rank(query, &items, |item| {
            (
                format!("{}/dl/{}/{}", base_url, key, item.id),
                format!("{}/stream/{}/{}", base_url, key, item.id),
            )
        }))
    }

    /// Morceaux bruts d'une page, depuis le cache ou le site amont
    pub async fn search_items(
        &self,
        query: &str,
        page: u32,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<(String, Arc<Vec<AudioItem>>)> {
        let key = self.cache_key(query, page);
        if let Some(items) = self.cache.get_search(&key).await {
            return Ok((key, items));
        }

        let items = self.fetch_items(query, page, captcha).await?;
        info!("Search '{}' page {}: {} items", query, page, items.len());
        self.cache.put_search(key.clone(), items.clone()).await;
        Ok((key, Arc::new(items)))
    }

    async fn fetch_items(
        &self,
        query: &str,
        page: u32,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<Vec<AudioItem>> {
        let mut params: Vec<(&str, String)> = if !query.is_empty() {
            vec![("act", "search".to_string()), ("q", query.to_string())]
        } else if self.settings.popular_enabled {
            vec![("act", "popular".to_string())]
        } else {
            let artist = random_artist();
            debug!("Empty query, searching random artist {}", artist);
            vec![("act", "search".to_string()), ("q", artist.to_string())]
        };
        if let Some(answer) = captcha {
            params.push(("captcha_sid", answer.captcha_sid.clone()));
            params.push(("captcha_key", answer.captcha_key.clone()));
        }

        let multiplier = self.settings.page_multiplier.max(1);
        let first = page.saturating_mul(multiplier);
        let mut items = Vec::new();

        for upstream_page in first..first.saturating_add(multiplier) {
            let offset = u64::from(upstream_page) * u64::from(self.settings.page_size);
            let mut query = params.clone();
            query.push(("offset", offset.to_string()));

            let body = self.session.get("audio", &query).await?;
            let raw = match scrape::parse_listing(&body) {
                Listing::Captcha(captcha) => {
                    warn!("Upstream requires a captcha (sid {})", captcha.captcha_sid);
                    return Err(VkError::UpstreamRejected {
                        code: CAPTCHA_ERROR_CODE,
                        message: "Captcha needed".to_string(),
                        captcha: Some(captcha),
                    });
                }
                Listing::Items(raw) => raw,
            };
            if raw.is_empty() {
                debug!("Upstream page at offset {} is empty, stopping", offset);
                break;
            }

            let owner = crate::session::page::owner_id(&body).or_else(|| self.session.owner_id());
            items.extend(raw.into_iter().filter_map(|r| self.to_audio_item(r, owner.as_deref())));
        }

        Ok(items)
    }

    /// Convertit un élément extrait ; `None` s'il n'est pas jouable
    fn to_audio_item(&self, raw: RawItem, owner: Option<&str>) -> Option<AudioItem> {
        if raw.url.is_empty() {
            debug!("Skipping {} - {}: no URL", raw.artist, raw.title);
            return None;
        }

        let (mp3, user_id) = if !raw.url.contains(ENCRYPTED_MARKER) {
            if !raw.url.starts_with("http") {
                warn!("Skipping {} - {}: unexpected URL", raw.artist, raw.title);
                return None;
            }
            (raw.url, None)
        } else {
            let Some(owner) = owner else {
                warn!("Skipping {} - {}: no owner id on page", raw.artist, raw.title);
                return None;
            };
            if self.settings.decoder_enabled {
                match decode::decrypt(&raw.url, owner) {
                    Some(url) => (url, None),
                    None => {
                        warn!("Skipping {} - {}: URL could not be decoded", raw.artist, raw.title);
                        return None;
                    }
                }
            } else {
                (raw.url, Some(owner.to_string()))
            }
        };

        Some(AudioItem {
            id: uni_hash(self.hash.id, &raw.upstream_id),
            artist: raw.artist,
            title: raw.title,
            duration: raw.duration,
            mp3,
            user_id,
        })
    }
}

fn random_artist() -> &'static str {
    ARTISTS.choose(&mut rand::rng()).copied().unwrap_or("Coldplay")
}
