//! # vkconfig - Configuration de VKAudio
//!
//! La configuration est un arbre YAML construit en trois couches :
//!
//! 1. le fichier `vkaudio.yaml` embarqué dans le binaire (valeurs par défaut) ;
//! 2. le fichier `config.yaml` du répertoire de configuration, fusionné
//!    par-dessus puis réécrit pour refléter les clés ajoutées ;
//! 3. les variables d'environnement `VKAUDIO_CONFIG__SECTION__CLE=valeur`.
//!
//! Le répertoire de configuration est, dans l'ordre : celui passé à
//! [`Config::load_config`], la variable `VKAUDIO_CONFIG`, `./.vkaudio`,
//! puis `~/.vkaudio`.
//!
//! Les crates métier ajoutent leurs propres getters typés par des traits
//! d'extension (voir `vkaudio::VkConfigExt`).
//!
//! ```no_run
//! use vkconfig::get_config;
//!
//! let config = get_config();
//! println!("port {} ({})", config.get_http_port(), config.get_log_min_level()?);
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod tree;

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::Value;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::{info, warn};

const EMBEDDED_DEFAULTS: &str = include_str!("vkaudio.yaml");
const CONFIG_FILE_NAME: &str = "config.yaml";
const CONFIG_DIR_NAME: &str = ".vkaudio";
const ENV_CONFIG_DIR: &str = "VKAUDIO_CONFIG";
const ENV_OVERRIDE_PREFIX: &str = "VKAUDIO_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 8000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load VKAudio configuration"));
}

/// Configuration chargée, partagée entre threads
///
/// Toute modification via [`Config::set_value`] est immédiatement réécrite
/// sur disque.
#[derive(Debug)]
pub struct Config {
    dir: PathBuf,
    file: PathBuf,
    data: RwLock<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            file: self.file.clone(),
            data: RwLock::new(self.read().clone()),
        }
    }
}

/// Répertoire candidat, sans vérification
fn locate_dir(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return PathBuf::from(explicit);
    }
    if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
        info!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory from environment");
        return PathBuf::from(from_env);
    }

    let local = PathBuf::from(CONFIG_DIR_NAME);
    if local.is_dir() {
        return local;
    }
    home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .filter(|dir| dir.is_dir())
        .unwrap_or(local)
}

/// Crée le répertoire au besoin et vérifie qu'on peut y écrire
fn ensure_writable(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let probe = dir.join(".write_test");
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)?;
    Ok(())
}

impl Config {
    /// Résout et valide le répertoire de configuration
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir = locate_dir(directory);
        ensure_writable(&dir)?;
        Ok(dir.to_string_lossy().into_owned())
    }

    /// Répertoire d'où la configuration a été chargée
    pub fn dir(&self) -> &str {
        self.dir.to_str().unwrap_or_default()
    }

    /// Charge la configuration depuis `directory` (vide : recherche automatique)
    ///
    /// Le résultat de la fusion est réécrit dans `config.yaml`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let dir = PathBuf::from(Self::config_dir(directory)?);
        let file = dir.join(CONFIG_FILE_NAME);
        info!(config_dir = %dir.display(), "Using config directory");

        let mut data: Value = serde_yaml::from_str(EMBEDDED_DEFAULTS)?;
        match fs::read_to_string(&file) {
            Ok(text) => {
                info!(config_file = %file.display(), "Merging config file");
                let overlay: Value = serde_yaml::from_str(&text)?;
                tree::merge(&mut data, &overlay);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(config_file = %file.display(), "No config file, using embedded defaults");
            }
            Err(e) => return Err(e.into()),
        }

        let mut data = tree::lowercase_keys(data);
        tree::apply_overrides(&mut data, ENV_OVERRIDE_PREFIX, env::vars());

        let config = Self {
            dir,
            file,
            data: RwLock::new(data),
        };
        config.save()?;
        Ok(config)
    }

    fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.data.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.data.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Réécrit `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.read())?;
        fs::write(&self.file, yaml)?;
        Ok(())
    }

    /// Écrit une valeur (ex: `&["host", "http_port"]`) puis sauvegarde
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        tree::insert(&mut self.write(), path, value)?;
        self.save()
    }

    /// Lit une valeur ; erreur si le chemin n'existe pas
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        tree::lookup(&self.read(), path).cloned()
    }

    /// Répertoire géré : absolu, ou relatif au répertoire de configuration
    ///
    /// Sans valeur configurée, `default` est enregistré. Le répertoire est
    /// créé s'il n'existe pas.
    ///
    /// ```no_run
    /// let media = vkconfig::get_config().get_managed_dir(&["download", "directory"], "audio_data")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let configured = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };

        let dir = self.dir.join(configured);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(directory = %dir.display(), "Created managed directory");
        }
        Ok(dir.to_string_lossy().into_owned())
    }

    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// URL publique des liens générés, sans `/` final ; `None` si vide
    pub fn get_base_url(&self) -> Option<String> {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().trim_end_matches('/').to_string())
            }
            _ => None,
        }
    }

    /// Port HTTP ; une valeur absente ou invalide donne 8000
    pub fn get_http_port(&self) -> u16 {
        let port = match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Ok(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };

        match port {
            Some(port) if port > 0 => port,
            _ => {
                warn!("Invalid or missing host.http_port, using {}", DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::from(port))
    }

    /// Entier positif, avec valeur par défaut
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Chaîne, avec valeur par défaut
    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    /// Liste de chaînes ; les éléments non textuels sont ignorés
    pub fn get_string_list(&self, path: &[&str]) -> Vec<String> {
        match self.get_value(path) {
            Ok(Value::Sequence(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_log_enable_console(&self) -> Result<bool> {
        match self.get_value(&["host", "logger", "enable_console"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(true),
        }
    }

    pub fn set_log_enable_console(&self, enabled: bool) -> Result<()> {
        self.set_value(&["host", "logger", "enable_console"], Value::Bool(enabled))
    }

    /// Niveau de log minimum (`TRACE` à `ERROR`)
    pub fn get_log_min_level(&self) -> Result<String> {
        Ok(self.get_string_or(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL))
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Configuration globale, chargée au premier accès
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}
