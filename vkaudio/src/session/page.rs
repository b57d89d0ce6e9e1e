//! Lecture des pages de connexion et de vérification
//!
//! Fonctions synchrones : `scraper::Html` n'est pas `Send` et ne doit pas
//! traverser un `.await`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// Lien de déconnexion présent sur toute page authentifiée
pub const LOGOUT_MARKER: &str = "https://login.vk.com/?act=logout";

/// Fragment d'URL d'une page de vérification de sécurité
pub const SECURITY_CHECK_MARKER: &str = "login?act=authcheck_code";

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("valid selector"));
static INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input").expect("valid selector"));
static FIELD_PREFIX: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".field_prefix").expect("valid selector"));
static OWNER_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']?(?:vk_id|user_id|uid)["']?\s*[:=]\s*["']?(\d+)"#).expect("valid regex")
});

pub fn is_authenticated(body: &str) -> bool {
    body.contains(LOGOUT_MARKER)
}

pub fn is_security_check(body: &str) -> bool {
    body.contains(SECURITY_CHECK_MARKER)
}

/// Premier formulaire d'une page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    /// URL de soumission, résolue contre l'URL de base
    pub url: Url,
    /// Champs déjà renseignés (cachés pour la plupart)
    pub filled: BTreeMap<String, String>,
    /// Champs vides que l'utilisateur doit fournir
    pub empty: BTreeSet<String>,
}

impl AuthForm {
    /// Analyse le premier `<form>` de la page
    ///
    /// Seuls les champs texte et cachés nommés sont retenus.
    pub fn parse(body: &str, base: &Url) -> Option<Self> {
        let document = Html::parse_document(body);
        let form = document.select(&FORM).next()?;

        let action = form.value().attr("action").unwrap_or("");
        let url = base.join(action).ok()?;

        let mut filled = BTreeMap::new();
        let mut empty = BTreeSet::new();
        for input in form.select(&INPUT) {
            let element = input.value();
            let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
            if !matches!(kind.as_str(), "text" | "hidden" | "tel" | "number") {
                continue;
            }
            let Some(name) = element.attr("name") else {
                continue;
            };
            match element.attr("value") {
                Some(value) if !value.is_empty() => {
                    filled.insert(name.to_string(), value.to_string());
                }
                _ => {
                    empty.insert(name.to_string());
                }
            }
        }

        Some(Self { url, filled, empty })
    }
}

/// Textes des éléments `.field_prefix` de la page
pub fn field_prefixes(body: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    document
        .select(&FIELD_PREFIX)
        .map(|e| e.text().collect::<String>())
        .collect()
}

/// Déduit le code manquant d'une vérification par numéro de téléphone
///
/// La page affiche le début et la fin du numéro ; le code attendu est le
/// segment central. La comparaison ne porte que sur les chiffres.
pub fn phone_check_code(prefixes: &[String], phone: &str) -> Option<String> {
    let [prefix, suffix] = prefixes else {
        return None;
    };

    let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    let phone = digits(phone);
    let prefix = digits(prefix);
    let suffix = digits(suffix);

    if prefix.len() + suffix.len() >= phone.len()
        || !phone.starts_with(&prefix)
        || !phone.ends_with(&suffix)
    {
        return None;
    }

    Some(phone[prefix.len()..phone.len() - suffix.len()].to_string())
}

/// Identifiant numérique de l'utilisateur connecté, tel qu'embarqué dans la page
pub fn owner_id(body: &str) -> Option<String> {
    OWNER_ID
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
