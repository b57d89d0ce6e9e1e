//! Classement des résultats de recherche
//!
//! Les morceaux « douteux » (remix, cover, sonnerie...) sont relégués en fin
//! de liste, sauf si la requête elle-même en demande un. L'ordre de la page
//! est conservé à l'intérieur de chaque partition.

use crate::models::{AudioItem, RankedAudioItem};
use regex::Regex;

/// Au-delà, une chaîne concaténée est jugée douteuse
const MAX_MATCH_LENGTH: usize = 100;

/// Classe des morceaux selon une requête
#[derive(Debug, Clone)]
pub struct Ranker {
    sort_regex: Regex,
    bad_words_regex: Regex,
}

impl Ranker {
    pub fn new(sort_regex: Regex, bad_words_regex: Regex) -> Self {
        Self {
            sort_regex,
            bad_words_regex,
        }
    }

    /// Vrai si les chaînes sont trop longues ou si l'une contient un marqueur douteux
    pub fn is_bad_match(&self, strings: &[&str]) -> bool {
        let length: usize = strings.iter().map(|s| s.chars().count()).sum();
        length > MAX_MATCH_LENGTH || strings.iter().any(|s| self.sort_regex.is_match(s))
    }

    /// Retire les références au site d'un artiste ou d'un titre
    pub fn clean(&self, value: &str) -> String {
        self.bad_words_regex.replace_all(value, "").trim().to_string()
    }

    /// Classe `items` pour `query` ; `links` construit les liens (téléchargement, écoute)
    pub fn rank<F>(&self, query: &str, items: &[AudioItem], links: F) -> Vec<RankedAudioItem>
    where
        F: Fn(&AudioItem) -> (String, String),
    {
        let sortable = !self.is_bad_match(&[query]);

        let mut head = Vec::with_capacity(items.len());
        let mut tail = Vec::new();
        for item in items {
            let artist = self.clean(&item.artist);
            let title = self.clean(&item.title);
            let (download_url, stream_url) = links(item);
            let bad = sortable && self.is_bad_match(&[&artist, &title]);

            let ranked = RankedAudioItem {
                artist,
                title,
                duration: item.duration,
                download_url,
                stream_url,
            };
            if bad {
                tail.push(ranked);
            } else {
                head.push(ranked);
            }
        }

        head.extend(tail);
        head
    }
}
