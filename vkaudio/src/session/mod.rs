//! Session authentifiée auprès du site amont
//!
//! La session imite un navigateur connecté : jar de cookies persistant sur
//! disque, connexion par formulaire, gestion des vérifications de sécurité
//! (2FA) et nombre de tentatives borné.
//!
//! ## Cycle de vie
//!
//! ```text
//! Unauthenticated ──authenticate()──► Authenticating ──► Authenticated
//!                                        │    ▲
//!                                        ▼    │ complete_challenge()
//!                                    SecurityCheck
//! ```
//!
//! Une page renvoyée sans lien de déconnexion ramène la session à l'état
//! non authentifié : le jar est effacé, fichier compris.
//!
//! La session est partagée par tous les appels concurrents. Deux
//! authentifications simultanées sont tolérées : la seconde n'est qu'une
//! tentative redondante, bornée par le même budget.

mod cookies;
pub mod page;

pub use cookies::PersistentJar;
use page::AuthForm;

use crate::config_ext::SessionSettings;
use crate::error::{Result, VkError};
use rand::seq::IndexedRandom;
use reqwest::Client;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

/// Raison d'un échec d'authentification non récupérable par la session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Budget de tentatives épuisé
    UnableToAuthorize,
    /// Le site a rejeté la session après une vérification
    AuthRequired,
}

/// Résultat d'une étape d'authentification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// L'appelant doit fournir ces champs à [`VkSession::complete_challenge`]
    ChallengeNeeded { fields: BTreeSet<String> },
    Failed(AuthFailure),
}

impl AuthOutcome {
    /// Convertit le résultat en erreur pour les appelants qui ne gèrent pas le 2FA
    pub fn into_result(self) -> Result<()> {
        match self {
            AuthOutcome::Authenticated => Ok(()),
            AuthOutcome::ChallengeNeeded { fields } => Err(VkError::ChallengeRequired { fields }),
            AuthOutcome::Failed(AuthFailure::UnableToAuthorize) => Err(VkError::UnableToAuthorize),
            AuthOutcome::Failed(AuthFailure::AuthRequired) => Err(VkError::AuthRequired),
        }
    }
}

/// Étape intermédiaire du traitement d'une vérification
enum CheckStep {
    /// Vérification résolue automatiquement, la réponse poursuit la boucle
    Continue(String),
    Done(AuthOutcome),
}

/// Identité amont et son état de connexion
pub struct VkSession {
    client: Client,
    jar: PersistentJar,
    base_url: Url,
    login: String,
    password: String,
    cookie_path: PathBuf,
    max_auth_retries: u32,
    auth_retries: AtomicU32,
    pending: Mutex<Option<AuthForm>>,
    owner_id: RwLock<Option<String>>,
}

impl VkSession {
    /// Crée une session pour l'identité `(login, password)`
    ///
    /// Le jar est rechargé depuis `cookie_dir/md5(login)` s'il existe.
    pub fn new(
        settings: &SessionSettings,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let login = login.into();
        std::fs::create_dir_all(&settings.cookie_dir)?;
        let cookie_path = settings.cookie_dir.join(vkutils::md5(&login));

        let jar = if cookie_path.exists() {
            match PersistentJar::load(&cookie_path) {
                Ok(jar) => jar,
                Err(e) => {
                    warn!("Unreadable cookie jar {}, starting fresh: {}", cookie_path.display(), e);
                    PersistentJar::new()
                }
            }
        } else {
            PersistentJar::new()
        };

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.as_str())
            .cookie_provider(jar.provider())
            .build()?;

        Ok(Self {
            client,
            jar,
            base_url: settings.base_url.clone(),
            login,
            password: password.into(),
            cookie_path,
            max_auth_retries: settings.max_auth_retries,
            auth_retries: AtomicU32::new(0),
            pending: Mutex::new(None),
            owner_id: RwLock::new(None),
        })
    }

    /// Crée une session sur un compte tiré au hasard parmi ceux configurés
    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        let account = settings
            .accounts
            .choose(&mut rand::rng())
            .ok_or_else(|| VkError::Other("No VK account configured (accounts.vk)".into()))?;
        info!("Using VK account {}", account.login);
        Self::new(settings, account.login.clone(), account.password.clone())
    }

    /// Chemin du fichier de cookies de cette identité
    pub fn cookie_path(&self) -> &Path {
        &self.cookie_path
    }

    /// Vrai si un jar persistant existe : condition nécessaire à [`Self::get`]
    pub fn has_cookie(&self) -> bool {
        self.cookie_path.exists()
    }

    /// Dernier identifiant utilisateur vu sur une page authentifiée
    pub fn owner_id(&self) -> Option<String> {
        self.owner_id
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Noms des champs de la vérification en attente, s'il y en a une
    pub fn pending_challenge(&self) -> Option<BTreeSet<String>> {
        self.lock_pending().as_ref().map(|f| f.empty.clone())
    }

    /// Tentatives de connexion consommées depuis le dernier succès
    pub fn auth_retries(&self) -> u32 {
        self.auth_retries.load(Ordering::SeqCst)
    }

    /// Résout `path` contre l'URL de base du site
    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<AuthForm>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn save_cookie(&self) {
        if let Err(e) = self.jar.save(&self.cookie_path) {
            warn!("Failed to save cookie jar {}: {}", self.cookie_path.display(), e);
        }
    }

    fn clear_cookie(&self) {
        self.jar.clear();
        match std::fs::remove_file(&self.cookie_path) {
            Ok(()) => info!("Session rejected by upstream, cookie jar cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove cookie jar {}: {}", self.cookie_path.display(), e),
        }
    }

    fn remember_owner(&self, body: &str) {
        if let Some(id) = page::owner_id(body) {
            *self.owner_id.write().unwrap_or_else(|p| p.into_inner()) = Some(id);
        }
    }

    fn on_authenticated(&self, body: &str) {
        self.auth_retries.store(0, Ordering::SeqCst);
        self.remember_owner(body);
        info!("VK session authenticated");
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        debug!("GET {}", url);
        Ok(self.client.get(url).send().await?.text().await?)
    }

    async fn post_form(&self, url: Url, fields: &[(String, String)]) -> Result<String> {
        debug!("POST {} ({} fields)", url, fields.len());
        Ok(self.client.post(url).form(fields).send().await?.text().await?)
    }

    /// Une tentative de connexion complète sur un jar vierge
    async fn try_auth(&self) -> Result<String> {
        let attempt = self.auth_retries.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Login attempt {}/{}", attempt, self.max_auth_retries);
        self.jar.clear();

        let login_page = self.get_text(self.url("login")?).await?;
        let form = AuthForm::parse(&login_page, &self.base_url)
            .ok_or_else(|| VkError::Other("Login page has no form".into()))?;

        let mut fields: Vec<(String, String)> = form.filled.into_iter().collect();
        fields.push(("email".to_string(), self.login.clone()));
        fields.push(("pass".to_string(), self.password.clone()));

        let body = self.post_form(form.url, &fields).await?;
        self.save_cookie();
        Ok(body)
    }

    /// Authentifie la session
    ///
    /// Sans jar persistant, se connecte via le formulaire ; sinon vérifie le
    /// jar existant sur le fil d'actualité. Les vérifications de sécurité
    /// par numéro de téléphone sont résolues sans intervention ; les autres
    /// sont renvoyées à l'appelant sous forme de [`AuthOutcome::ChallengeNeeded`].
    pub async fn authenticate(&self) -> Result<AuthOutcome> {
        let mut body = if self.has_cookie() {
            self.get_text(self.url("feed")?).await?
        } else {
            self.try_auth().await?
        };

        loop {
            if page::is_security_check(&body) {
                match self.handle_security_check(&body).await? {
                    CheckStep::Continue(next) => body = next,
                    CheckStep::Done(outcome) => return Ok(outcome),
                }
            }

            if page::is_authenticated(&body) {
                self.on_authenticated(&body);
                return Ok(AuthOutcome::Authenticated);
            }

            if self.auth_retries() >= self.max_auth_retries {
                error!("Unable to authorize {} after {} attempts", self.login, self.auth_retries());
                return Ok(AuthOutcome::Failed(AuthFailure::UnableToAuthorize));
            }

            body = self.try_auth().await?;
        }
    }

    async fn handle_security_check(&self, body: &str) -> Result<CheckStep> {
        let form = AuthForm::parse(body, &self.base_url)
            .ok_or_else(|| VkError::Other("Security check page has no form".into()))?;
        let prefixes = page::field_prefixes(body);
        info!("Security check requested (fields: {:?})", form.empty);

        let code = match (form.empty.len(), page::phone_check_code(&prefixes, &self.login)) {
            (1, Some(code)) => code,
            _ => {
                let fields = form.empty.clone();
                *self.lock_pending() = Some(form);
                return Ok(CheckStep::Done(AuthOutcome::ChallengeNeeded { fields }));
            }
        };

        info!("Phone security check resolved from the account number");
        let mut values = HashMap::new();
        if let Some(name) = form.empty.iter().next() {
            values.insert(name.clone(), code);
        }
        let response = self.submit_challenge(form, values).await?;

        if page::is_authenticated(&response) {
            Ok(CheckStep::Continue(response))
        } else {
            self.clear_cookie();
            Ok(CheckStep::Done(AuthOutcome::Failed(AuthFailure::AuthRequired)))
        }
    }

    async fn submit_challenge(
        &self,
        form: AuthForm,
        values: HashMap<String, String>,
    ) -> Result<String> {
        let mut fields: Vec<(String, String)> = form.filled.into_iter().collect();
        fields.extend(values);

        let response = self.post_form(form.url, &fields).await?;
        self.save_cookie();
        Ok(response)
    }

    /// Termine une vérification de sécurité en attente
    ///
    /// `fields` doit contenir exactement les champs annoncés par
    /// [`AuthOutcome::ChallengeNeeded`] ; sinon [`VkError::FieldsMismatch`]
    /// est renvoyé et la vérification reste en attente.
    pub async fn complete_challenge(&self, fields: HashMap<String, String>) -> Result<AuthOutcome> {
        let form = {
            let mut pending = self.lock_pending();
            let supplied: BTreeSet<String> = fields.keys().cloned().collect();
            match pending.take() {
                Some(form) if form.empty == supplied => form,
                Some(form) => {
                    warn!(
                        "Security check fields mismatch: expected {:?}, got {:?}",
                        form.empty, supplied
                    );
                    *pending = Some(form);
                    return Err(VkError::FieldsMismatch);
                }
                None => return Err(VkError::NoPendingChallenge),
            }
        };

        let response = self.submit_challenge(form, fields).await?;

        if page::is_authenticated(&response) {
            self.on_authenticated(&response);
            return Ok(AuthOutcome::Authenticated);
        }

        if page::is_security_check(&response) {
            return match self.handle_security_check(&response).await? {
                CheckStep::Continue(next) => {
                    self.on_authenticated(&next);
                    Ok(AuthOutcome::Authenticated)
                }
                CheckStep::Done(outcome) => Ok(outcome),
            };
        }

        self.clear_cookie();
        Ok(AuthOutcome::Failed(AuthFailure::AuthRequired))
    }

    /// GET authentifié sur `path` (relatif à l'URL de base)
    ///
    /// Échoue avec [`VkError::AuthRequired`] sans jar persistant, ou si la
    /// page renvoyée n'est pas authentifiée (le jar est alors effacé).
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        if !self.has_cookie() {
            return Err(VkError::AuthRequired);
        }

        let mut url = self.url(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let body = self.get_text(url).await?;
        if !page::is_authenticated(&body) {
            self.clear_cookie();
            return Err(VkError::AuthRequired);
        }

        self.remember_owner(&body);
        Ok(body)
    }
}
