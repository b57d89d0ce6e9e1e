//! Structures de données manipulées par le pipeline
//!
//! Les éléments extraits des pages amont ([`AudioItem`]) sont ceux que l'on
//! met en cache. Seuls les éléments classés ([`RankedAudioItem`]) sont
//! renvoyés à l'appelant : ils ne contiennent jamais l'URL amont.

use serde::{Deserialize, Serialize};

/// Un morceau extrait d'une page de résultats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioItem {
    /// Identifiant stable (hash de l'identifiant amont)
    pub id: String,
    pub artist: String,
    pub title: String,
    /// Durée en secondes
    pub duration: u32,
    /// URL du média, déchiffrée ou encore chiffrée si `user_id` est présent
    pub mp3: String,
    /// Propriétaire de l'URL chiffrée, requis pour un déchiffrement différé
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AudioItem {
    /// Nom de fichier présenté au client : `"{artist} - {title}.mp3"`
    pub fn display_name(&self) -> String {
        let name = format!("{} - {}", self.artist, self.title);
        format!("{}.mp3", vkutils::sanitize(&name, false, false))
    }

    /// URL directe du média, en déchiffrant si nécessaire
    pub fn playable_url(&self) -> Option<String> {
        match &self.user_id {
            Some(owner) => crate::decode::decrypt(&self.mp3, owner),
            None => Some(self.mp3.clone()),
        }
    }
}

/// Élément renvoyé par la recherche
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedAudioItem {
    pub artist: String,
    pub title: String,
    pub duration: u32,
    pub download_url: String,
    pub stream_url: String,
}

/// Réponse captcha fournie par l'appelant pour rejouer une recherche
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CaptchaAnswer {
    pub captcha_sid: String,
    pub captcha_key: String,
}
