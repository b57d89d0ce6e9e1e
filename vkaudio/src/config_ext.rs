//! Extension pour intégrer la configuration VK dans vkconfig
//!
//! Ce module fournit le trait `VkConfigExt` qui ajoute à `vkconfig::Config`
//! les getters des options du proxy, et [`VkSettings`], l'instantané typé de
//! ces options injecté dans la session, la recherche et le téléchargement.
//!
//! Les composants ne lisent jamais la configuration globale eux-mêmes.

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use vkconfig::Config;
use vkutils::HashKind;

pub const DEFAULT_VK_BASE_URL: &str = "https://m.vk.com/";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0";
pub const DEFAULT_SORT_REGEX: &str = r"(?i)[ \[\],.:\)\(\-_](bass ?boost(ed)?|dub sound|remake|low bass|cover|(re)?mix|dj|bootleg|edit|aco?ustic|instrumental|karaoke|tribute|vs|rework|mash|rmx|(night|day|slow)core|remode|ringtone?|рингтон|РИНГТОН|Рингтон|звонок|минус)([ ,.:\[\]\)\(\-_].*)?$";
pub const DEFAULT_BAD_WORDS_REGEX: &str = r"(?i)(https?://)?(vkontakte|vk)\.?(com|ru)?/?(club|id)?\d*";

/// Un compte amont configuré sous `accounts.vk`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkAccount {
    pub login: String,
    pub password: String,
}

/// Trait d'extension pour lire la configuration VK depuis vkconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use vkconfig::get_config;
/// use vkaudio::VkConfigExt;
///
/// let config = get_config();
/// println!("Upstream: {}", config.get_vk_base_url()?);
/// ```
pub trait VkConfigExt {
    /// Comptes configurés ; les entrées incomplètes sont ignorées
    fn get_vk_accounts(&self) -> Result<Vec<VkAccount>>;

    /// Ajoute un compte à `accounts.vk`
    fn add_vk_account(&self, login: &str, password: &str) -> Result<()>;

    /// URL de base du site amont
    fn get_vk_base_url(&self) -> Result<Url>;

    fn get_vk_user_agent(&self) -> Result<String>;

    /// Nombre maximal de tentatives de connexion
    fn get_vk_max_auth_retries(&self) -> Result<u32>;

    /// Délai d'une requête de page
    fn get_vk_request_timeout(&self) -> Result<Duration>;

    /// Répertoire des jars de cookies, créé s'il n'existe pas
    fn get_vk_cookie_dir(&self) -> Result<String>;

    fn get_search_page_size(&self) -> Result<u32>;

    fn get_search_page_multiplier(&self) -> Result<u32>;

    /// Requête vide : liste populaire plutôt qu'un artiste au hasard
    fn get_search_popular_enabled(&self) -> Result<bool>;

    /// Déchiffrement pendant la recherche (sinon au téléchargement)
    fn get_search_decoder_enabled(&self) -> Result<bool>;

    /// Motif des titres de mauvaise qualité (remix, cover...)
    fn get_search_sort_regex(&self) -> Result<Regex>;

    /// Motif des références au site à retirer des titres
    fn get_search_bad_words_regex(&self) -> Result<Regex>;

    fn get_download_timeout(&self) -> Result<Duration>;

    /// Répertoire des fichiers média, créé s'il n'existe pas
    fn get_download_dir(&self) -> Result<String>;

    fn get_download_allowed_mime(&self) -> Result<Vec<String>>;

    /// Empreintes md5 des fichiers de remplacement servis pour les morceaux morts
    fn get_download_blocked_hashes(&self) -> Result<Vec<String>>;

    fn get_cache_search_ttl(&self) -> Result<Duration>;

    fn get_cache_search_capacity(&self) -> Result<u64>;

    /// TTL des fiches ; `None` quand configuré à 0 (pas d'expiration)
    fn get_cache_audio_info_ttl(&self) -> Result<Option<Duration>>;

    /// Copie disque des fiches, créée si elle n'existe pas
    fn get_cache_audio_info_dir(&self) -> Result<String>;

    /// Algorithme de hachage d'un usage (`cache`, `id` ou `mp3`)
    fn get_hash_kind(&self, usage: &str) -> Result<HashKind>;
}

fn get_bool_or(config: &Config, path: &[&str], default: bool) -> bool {
    match config.get_value(path) {
        Ok(Value::Bool(b)) => b,
        Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn get_u32_or(config: &Config, path: &[&str], default: u32) -> Result<u32> {
    let value = config.get_u64_or(path, default as u64);
    u32::try_from(value).map_err(|_| anyhow!("{} out of range: {}", path.join("."), value))
}

fn get_regex_or(config: &Config, path: &[&str], default: &str) -> Result<Regex> {
    let pattern = config.get_string_or(path, default);
    Regex::new(&pattern).map_err(|e| anyhow!("Invalid regex for {}: {}", path.join("."), e))
}

impl VkConfigExt for Config {
    fn get_vk_accounts(&self) -> Result<Vec<VkAccount>> {
        match self.get_value(&["accounts", "vk"]) {
            Ok(Value::Sequence(seq)) => Ok(seq
                .into_iter()
                .filter_map(|v| serde_yaml::from_value::<VkAccount>(v).ok())
                .filter(|a| !a.login.is_empty())
                .collect()),
            Ok(Value::Null) | Err(_) => Ok(Vec::new()),
            Ok(_) => Err(anyhow!("accounts.vk must be a list of {{login, password}}")),
        }
    }

    fn add_vk_account(&self, login: &str, password: &str) -> Result<()> {
        let mut accounts = self.get_vk_accounts()?;
        accounts.retain(|a| a.login != login);
        accounts.push(VkAccount {
            login: login.to_string(),
            password: password.to_string(),
        });
        self.set_value(&["accounts", "vk"], serde_yaml::to_value(accounts)?)
    }

    fn get_vk_base_url(&self) -> Result<Url> {
        let raw = self.get_string_or(&["vk", "base_url"], DEFAULT_VK_BASE_URL);
        // join() exige un '/' final pour conserver le chemin de base
        let raw = if raw.ends_with('/') { raw } else { format!("{}/", raw) };
        Url::parse(&raw).map_err(|e| anyhow!("Invalid vk.base_url '{}': {}", raw, e))
    }

    fn get_vk_user_agent(&self) -> Result<String> {
        Ok(self.get_string_or(&["vk", "user_agent"], DEFAULT_USER_AGENT))
    }

    fn get_vk_max_auth_retries(&self) -> Result<u32> {
        get_u32_or(self, &["vk", "max_auth_retries"], 3)
    }

    fn get_vk_request_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_secs(self.get_u64_or(&["vk", "request_timeout"], 30)))
    }

    fn get_vk_cookie_dir(&self) -> Result<String> {
        self.get_managed_dir(&["vk", "cookie_directory"], "cookies")
    }

    fn get_search_page_size(&self) -> Result<u32> {
        get_u32_or(self, &["search", "page_size"], 20)
    }

    fn get_search_page_multiplier(&self) -> Result<u32> {
        Ok(get_u32_or(self, &["search", "page_multiplier"], 1)?.max(1))
    }

    fn get_search_popular_enabled(&self) -> Result<bool> {
        Ok(get_bool_or(self, &["search", "popular_enabled"], false))
    }

    fn get_search_decoder_enabled(&self) -> Result<bool> {
        Ok(get_bool_or(self, &["search", "decoder_enabled"], true))
    }

    fn get_search_sort_regex(&self) -> Result<Regex> {
        get_regex_or(self, &["search", "sort_regex"], DEFAULT_SORT_REGEX)
    }

    fn get_search_bad_words_regex(&self) -> Result<Regex> {
        get_regex_or(self, &["search", "bad_words_regex"], DEFAULT_BAD_WORDS_REGEX)
    }

    fn get_download_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_secs(self.get_u64_or(&["download", "timeout"], 60)))
    }

    fn get_download_dir(&self) -> Result<String> {
        self.get_managed_dir(&["download", "directory"], "audio_data")
    }

    fn get_download_allowed_mime(&self) -> Result<Vec<String>> {
        let mimes = self.get_string_list(&["download", "allowed_mime"]);
        if mimes.is_empty() {
            Ok(vec!["audio/mpeg".to_string()])
        } else {
            Ok(mimes)
        }
    }

    fn get_download_blocked_hashes(&self) -> Result<Vec<String>> {
        Ok(self
            .get_string_list(&["download", "blocked_hashes"])
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect())
    }

    fn get_cache_search_ttl(&self) -> Result<Duration> {
        Ok(Duration::from_secs(
            self.get_u64_or(&["cache", "search_pages", "ttl"], 86400),
        ))
    }

    fn get_cache_search_capacity(&self) -> Result<u64> {
        Ok(self.get_u64_or(&["cache", "search_pages", "capacity"], 10000))
    }

    fn get_cache_audio_info_ttl(&self) -> Result<Option<Duration>> {
        match self.get_u64_or(&["cache", "audio_info", "ttl"], 0) {
            0 => Ok(None),
            secs => Ok(Some(Duration::from_secs(secs))),
        }
    }

    fn get_cache_audio_info_dir(&self) -> Result<String> {
        self.get_managed_dir(&["cache", "audio_info", "directory"], "audio_info")
    }

    fn get_hash_kind(&self, usage: &str) -> Result<HashKind> {
        let default = if usage == "mp3" { "md5" } else { "crc32" };
        self.get_string_or(&["hash", usage], default)
            .parse()
            .map_err(|e: String| anyhow!("hash.{}: {}", usage, e))
    }
}

/// Paramètres de la session amont
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: Url,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_auth_retries: u32,
    pub cookie_dir: PathBuf,
    pub accounts: Vec<VkAccount>,
}

/// Paramètres du pipeline de recherche
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub page_size: u32,
    pub page_multiplier: u32,
    pub popular_enabled: bool,
    pub decoder_enabled: bool,
    pub sort_regex: Regex,
    pub bad_words_regex: Regex,
}

/// Paramètres du pipeline de téléchargement
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub timeout: Duration,
    pub directory: PathBuf,
    pub allowed_mime: Vec<String>,
    pub blocked_hashes: Vec<String>,
}

/// Paramètres des deux régions du cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub search_ttl: Duration,
    pub search_capacity: u64,
    pub audio_info_ttl: Option<Duration>,
    /// Copie disque des fiches ; `None` pour un cache purement mémoire
    pub audio_info_dir: Option<PathBuf>,
}

/// Algorithmes de hachage par usage
#[derive(Debug, Clone, Copy)]
pub struct HashSettings {
    /// Clés de la région des pages de recherche
    pub cache: HashKind,
    /// Identifiants des morceaux
    pub id: HashKind,
    /// Noms des fichiers média
    pub mp3: HashKind,
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            cache: HashKind::Crc32,
            id: HashKind::Crc32,
            mp3: HashKind::Md5,
        }
    }
}

/// Instantané typé de la configuration, injecté dans les composants
#[derive(Debug, Clone)]
pub struct VkSettings {
    pub session: SessionSettings,
    pub search: SearchSettings,
    pub download: DownloadSettings,
    pub cache: CacheSettings,
    pub hash: HashSettings,
    /// URL publique des liens générés ; `None` pour la déduire de la requête
    pub public_base_url: Option<String>,
}

impl VkSettings {
    /// Lit toutes les options depuis la configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            session: SessionSettings {
                base_url: config.get_vk_base_url()?,
                user_agent: config.get_vk_user_agent()?,
                request_timeout: config.get_vk_request_timeout()?,
                max_auth_retries: config.get_vk_max_auth_retries()?,
                cookie_dir: PathBuf::from(config.get_vk_cookie_dir()?),
                accounts: config.get_vk_accounts()?,
            },
            search: SearchSettings {
                page_size: config.get_search_page_size()?,
                page_multiplier: config.get_search_page_multiplier()?,
                popular_enabled: config.get_search_popular_enabled()?,
                decoder_enabled: config.get_search_decoder_enabled()?,
                sort_regex: config.get_search_sort_regex()?,
                bad_words_regex: config.get_search_bad_words_regex()?,
            },
            download: DownloadSettings {
                timeout: config.get_download_timeout()?,
                directory: PathBuf::from(config.get_download_dir()?),
                allowed_mime: config.get_download_allowed_mime()?,
                blocked_hashes: config.get_download_blocked_hashes()?,
            },
            cache: CacheSettings {
                search_ttl: config.get_cache_search_ttl()?,
                search_capacity: config.get_cache_search_capacity()?,
                audio_info_ttl: config.get_cache_audio_info_ttl()?,
                audio_info_dir: Some(PathBuf::from(config.get_cache_audio_info_dir()?)),
            },
            hash: HashSettings {
                cache: config.get_hash_kind("cache")?,
                id: config.get_hash_kind("id")?,
                mp3: config.get_hash_kind("mp3")?,
            },
            public_base_url: config.get_base_url(),
        })
    }

    /// Paramètres par défaut pointant vers `base_url`, données sous `data_dir`
    ///
    /// Aucun compte n'est configuré.
    pub fn with_defaults(base_url: Url, data_dir: &Path) -> Result<Self> {
        Ok(Self {
            session: SessionSettings {
                base_url,
                user_agent: DEFAULT_USER_AGENT.to_string(),
                request_timeout: Duration::from_secs(30),
                max_auth_retries: 3,
                cookie_dir: data_dir.join("cookies"),
                accounts: Vec::new(),
            },
            search: SearchSettings {
                page_size: 20,
                page_multiplier: 1,
                popular_enabled: false,
                decoder_enabled: true,
                sort_regex: Regex::new(DEFAULT_SORT_REGEX)?,
                bad_words_regex: Regex::new(DEFAULT_BAD_WORDS_REGEX)?,
            },
            download: DownloadSettings {
                timeout: Duration::from_secs(60),
                directory: data_dir.join("audio_data"),
                allowed_mime: vec!["audio/mpeg".to_string()],
                blocked_hashes: Vec::new(),
            },
            cache: CacheSettings {
                search_ttl: Duration::from_secs(86400),
                search_capacity: 10000,
                audio_info_ttl: None,
                audio_info_dir: Some(data_dir.join("audio_info")),
            },
            hash: HashSettings::default(),
            public_base_url: None,
        })
    }
}
