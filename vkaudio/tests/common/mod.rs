//! Site amont simulé partagé par les tests d'intégration

#![allow(dead_code)]

use std::path::Path;
use url::Url;
use vkaudio::VkSettings;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LOGIN: &str = "79991234567";
pub const PASSWORD: &str = "secret";
pub const OWNER_ID: &str = "22718044";

/// URL chiffrée réelle, déchiffrable avec [`OWNER_ID`]
pub const LIVE_SAMPLE: &str = concat!(
    "https://m.vk.com/mp3/audio_api_unavailable.mp3?",
    "extra=nuvUsJrHChz1oxfLswGZDerRzNnrs2fZDeDLnMuYz",
    "v96sMn1mZj3BJrbyJbPC1u5AI9sCLzAAfHmDf9Mrdf1ltq9",
    "l3rMttfZBO5AmhbNn184zMLsr1fyuJLnChjWngvnD3Lbowr",
    "qzvDzv1iYB2nIrwj3nY1vAY5bwtnFlxDhwtnADhHZmun2DJ",
    "iTlLv5Au5TDf9vAeO3BMCVEdDWoJDHA1b5rxHfzZ9TvY5eD",
    "ZrmD3i3AZq4luT4C1rurtGVr3vjuJfPywvVnxLI#AqS1otu",
);
pub const LIVE_SAMPLE_DECODED: &str = concat!(
    "https://cs1-79v4.vkuseraudio.net/p7/b6caf118ef9492.mp3?extra=",
    "w2_XKQwEzMKEX8peERy4sg7aW4x_GAMW_u-f1sGkyiMDNWn3yEUpC_TPj8iZR-D7Lhnw",
    "bbLvUb2RQNE5Yu03ImJqeYIDJ9TMxtR74rt3VGe4-0PAZyookgwYwwg7GiRUZs-_2Ufh5xkA",
);

/// URL chiffrée par un simple décalage, indépendante du propriétaire
pub const CAESAR_SAMPLE: &str =
    "https://m.vk.com/mp3/audio_api_unavailable.mp3?extra=BxL5DxG6zgrQq2zYDxfQlMHOCMrMlNj1oa#CGS1";
pub const CAESAR_SAMPLE_DECODED: &str = "https://example.com/a.mp3";

/// Trames MPEG-1 couche III à 128 kb/s, 44,1 kHz, sans tag
pub fn mp3_payload() -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
    frame.repeat(16)
}

pub fn settings(server: &MockServer, dir: &Path) -> VkSettings {
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    VkSettings::with_defaults(base, dir).unwrap()
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body.to_string())
}

/// Page authentifiée : lien de déconnexion et identifiant embarqué
pub fn authenticated_page(content: &str) -> String {
    format!(
        r#"<html><head><script>window.vk = {{"vk_id": {}, "lang": 3}};</script></head>
<body><a href="https://login.vk.com/?act=logout&hash=1">Log out</a>{}</body></html>"#,
        OWNER_ID, content
    )
}

pub fn login_page() -> String {
    r#"<html><body>
  <form method="post" action="/do_login">
    <input type="hidden" name="ip_h" value="abc"/>
    <input type="text" name="email"/>
    <input type="password" name="pass"/>
    <input type="submit" value="Log in"/>
  </form>
</body></html>"#
        .to_string()
}

/// Page de vérification ; `prefixes` encadre le champ du code
pub fn security_check_page(prefixes: Option<(&str, &str)>) -> String {
    let (before, after) = match prefixes {
        Some((p, s)) => (
            format!(r#"<span class="field_prefix">{}</span>"#, p),
            format!(r#"<span class="field_prefix">{}</span>"#, s),
        ),
        None => (String::new(), String::new()),
    };
    format!(
        r#"<html><body>
  <form method="post" action="/login?act=authcheck_code&hash=42">
    <input type="hidden" name="remember" value="1"/>
    {}<input type="text" name="code"/>{}
  </form>
</body></html>"#,
        before, after
    )
}

/// Monte la page de connexion ; la réponse au POST est fournie par l'appelant
pub async fn mount_login(server: &MockServer, post_response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(html(&login_page()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/do_login"))
        .respond_with(post_response)
        .mount(server)
        .await;
}

/// Connexion directe réussie
pub async fn mount_successful_login(server: &MockServer) {
    mount_login(
        server,
        html(&authenticated_page("")).insert_header("set-cookie", "remixsid=abc; Path=/"),
    )
    .await;
}

/// Élément de liste amont
pub fn listing_item(data_id: &str, artist: &str, title: &str, duration: u32, url: &str) -> String {
    format!(
        r#"<div class="audio_item" data-id="{}">
  <input type="hidden" value="{}"/>
  <div class="ai_info"><span class="ai_artist">{}</span><span class="ai_title">{}</span>
  <div class="ai_dur" data-dur="{}"></div></div>
</div>"#,
        data_id, url, artist, title, duration
    )
}
