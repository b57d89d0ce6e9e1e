//! Extraction des morceaux depuis les pages de listes amont

use crate::error::Captcha;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static AUDIO_ITEM: Lazy<Selector> = Lazy::new(|| selector(".audio_item[data-id]"));
static ARTIST: Lazy<Selector> = Lazy::new(|| selector(".ai_artist"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".ai_title"));
static DURATION: Lazy<Selector> = Lazy::new(|| selector(".ai_dur"));
static HIDDEN_URL: Lazy<Selector> = Lazy::new(|| selector("input[type=hidden]"));
static CAPTCHA_SID: Lazy<Selector> = Lazy::new(|| selector("input[name=captcha_sid]"));
static CAPTCHA_IMG: Lazy<Selector> = Lazy::new(|| selector("img"));

/// Un élément de liste tel qu'il apparaît dans la page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    /// Identifiant amont (`data-id`)
    pub upstream_id: String,
    pub artist: String,
    pub title: String,
    pub duration: u32,
    /// URL chiffrée, vide pour un morceau indisponible
    pub url: String,
}

/// Contenu d'une page de liste
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Items(Vec<RawItem>),
    /// Le site exige un captcha avant de répondre
    Captcha(Captcha),
}

fn text_of(item: &ElementRef<'_>, selector: &Selector) -> String {
    item.select(selector)
        .next()
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// Durée en secondes : attribut `data-dur`, sinon texte `m:ss` ou `h:mm:ss`
fn duration_of(item: &ElementRef<'_>) -> u32 {
    let Some(node) = item.select(&DURATION).next() else {
        return 0;
    };
    if let Some(secs) = node.value().attr("data-dur").and_then(|d| d.trim().parse().ok()) {
        return secs;
    }

    parse_clock(&node.text().collect::<String>()).unwrap_or(0)
}

/// `m:ss` ou `h:mm:ss` en secondes ; `None` si illisible ou trop grand
fn parse_clock(text: &str) -> Option<u32> {
    text.trim().split(':').try_fold(0u32, |acc, part| {
        let n = part.trim().parse::<u32>().ok()?;
        acc.checked_mul(60)?.checked_add(n)
    })
}

fn captcha_of(document: &Html) -> Option<Captcha> {
    let sid = document.select(&CAPTCHA_SID).next()?.value().attr("value")?;
    let img = document
        .select(&CAPTCHA_IMG)
        .filter_map(|e| e.value().attr("src"))
        .find(|src| src.contains("captcha"))
        .unwrap_or_default();

    Some(Captcha {
        captcha_sid: sid.to_string(),
        captcha_img: img.to_string(),
    })
}

/// Analyse une page de résultats
///
/// Les morceaux sans URL sont conservés ici : la page compte comme non vide.
pub fn parse_listing(body: &str) -> Listing {
    let document = Html::parse_document(body);

    if let Some(captcha) = captcha_of(&document) {
        return Listing::Captcha(captcha);
    }

    let items = document
        .select(&AUDIO_ITEM)
        .filter_map(|item| {
            let upstream_id = item.value().attr("data-id")?.trim().to_string();
            let url = item
                .select(&HIDDEN_URL)
                .next()
                .and_then(|input| input.value().attr("value"))
                .unwrap_or("")
                .trim()
                .to_string();

            Some(RawItem {
                upstream_id,
                artist: text_of(&item, &ARTIST),
                title: text_of(&item, &TITLE),
                duration: duration_of(&item),
                url,
            })
        })
        .collect();

    Listing::Items(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="audio_item" data-id="2000_4560">
            <input type="hidden" value="https://vk.com/mp3/audio_api_unavailable.mp3?extra=abc"/>
            <div class="ai_info">
              <span class="ai_artist">Coldplay</span>
              <span class="ai_title">  Yellow
              </span>
              <div class="ai_dur" data-dur="269">4:29</div>
            </div>
          </div>
          <div class="audio_item" data-id="2000_4561">
            <input type="hidden" value=""/>
            <span class="ai_artist">Coldplay</span><span class="ai_title">Fix You</span>
            <div class="ai_dur">1:04:55</div>
          </div>
          <div class="audio_item">no id</div>
        </body></html>"#;

    #[test]
    fn test_parse_items() {
        let Listing::Items(items) = parse_listing(PAGE) else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].upstream_id, "2000_4560");
        assert_eq!(items[0].title, "Yellow");
        assert_eq!(items[0].duration, 269);
        assert!(items[0].url.contains("audio_api_unavailable"));
        assert_eq!(items[1].url, "");
        assert_eq!(items[1].duration, 3895);
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("4:29"), Some(269));
        assert_eq!(parse_clock(" 1:02:03 "), Some(3723));
        assert_eq!(parse_clock("x:10"), None);
        assert_eq!(parse_clock("99999999:99999999:99"), None);
        assert_eq!(parse_clock("4294967295:0"), None);
    }

    #[test]
    fn test_empty_page() {
        assert_eq!(parse_listing("<html><body></body></html>"), Listing::Items(Vec::new()));
    }

    #[test]
    fn test_captcha_page() {
        let body = r#"
            <form action="/audio?act=search">
              <img src="https://m.vk.com/captcha.php?sid=8812&s=1"/>
              <input type="hidden" name="captcha_sid" value="8812"/>
              <input type="text" name="captcha_key"/>
            </form>"#;

        assert_eq!(
            parse_listing(body),
            Listing::Captcha(Captcha {
                captcha_sid: "8812".to_string(),
                captcha_img: "https://m.vk.com/captcha.php?sid=8812&s=1".to_string(),
            })
        );
    }
}
