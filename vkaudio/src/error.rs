//! Gestion des erreurs pour le client VK

use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Type Result personnalisé pour vkaudio
pub type Result<T> = std::result::Result<T, VkError>;

/// Jeton captcha renvoyé par le site amont avec une erreur 14
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Captcha {
    pub captcha_sid: String,
    pub captcha_img: String,
}

/// Erreurs possibles lors de l'utilisation du client VK
#[derive(Error, Debug)]
pub enum VkError {
    /// Pas de session valide : l'appelant doit relancer l'authentification
    #[error("Authentication required")]
    AuthRequired,

    /// Une étape interactive est nécessaire, avec les champs à remplir
    #[error("Security check requires user input: {}", fields.iter().cloned().collect::<Vec<_>>().join(", "))]
    ChallengeRequired { fields: BTreeSet<String> },

    /// Les champs fournis ne correspondent pas au formulaire sauvegardé
    #[error("Submitted fields do not match the saved security check form")]
    FieldsMismatch,

    /// Aucun formulaire de vérification en attente
    #[error("No pending security check")]
    NoPendingChallenge,

    /// Budget de tentatives épuisé
    #[error("Unable to authorize")]
    UnableToAuthorize,

    /// Requête refusée par le site amont (captcha, etc.)
    #[error("({code}) {message}")]
    UpstreamRejected {
        code: u16,
        message: String,
        captcha: Option<Captcha>,
    },

    /// Élément introuvable ou média invalide
    #[error("Not found: {0}")]
    NotFound(String),

    /// Erreur HTTP
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Erreur d'entrée/sortie disque
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// URL amont invalide
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Expression régulière de configuration invalide
    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur générique
    #[error("VK error: {0}")]
    Other(String),
}

impl VkError {
    /// Code numérique, aligné sur les statuts HTTP, exposé dans les réponses
    pub fn error_code(&self) -> u16 {
        match self {
            VkError::AuthRequired | VkError::UnableToAuthorize => 401,
            VkError::ChallengeRequired { .. } => 403,
            VkError::UpstreamRejected { captcha: Some(_), .. } => 403,
            VkError::UpstreamRejected { code, .. } if (400..600).contains(code) => *code,
            VkError::UpstreamRejected { .. } => 400,
            VkError::FieldsMismatch | VkError::NoPendingChallenge => 409,
            VkError::NotFound(_) => 404,
            VkError::Transport(_) => 502,
            _ => 500,
        }
    }

    /// Message renvoyé aux clients HTTP
    ///
    /// Les erreurs internes ou de transport ne sont décrites qu'en
    /// substance : leur texte complet peut contenir l'URL média déchiffrée
    /// ou des chemins locaux, et reste réservé aux journaux.
    pub fn public_message(&self) -> String {
        match self {
            VkError::Transport(e) if e.is_timeout() => "Upstream request timed out".to_string(),
            VkError::Transport(_) => "Upstream transfer failed".to_string(),
            VkError::Io(_) => "Local storage error".to_string(),
            VkError::Config(_) | VkError::Regex(_) => "Server misconfiguration".to_string(),
            VkError::InvalidUrl(_) | VkError::JsonParse(_) | VkError::Other(_) => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }
}
