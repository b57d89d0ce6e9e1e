//! Fichiers média locaux : validation, tags ID3 et en-têtes de réponse

use crate::config_ext::DownloadSettings;
use crate::error::{Result, VkError};
use crate::models::AudioItem;
use lofty::config::WriteOptions;
use lofty::file::FileType;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Taille des blocs lus ou écrits sur disque
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Caractères laissés tels quels dans `filename*` (RFC 5987 attr-char)
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Type MIME d'un format reconnu par lofty
fn mime_of(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Mpeg => Some("audio/mpeg"),
        FileType::Aac => Some("audio/aac"),
        FileType::Vorbis | FileType::Opus | FileType::Speex => Some("audio/ogg"),
        FileType::Flac => Some("audio/flac"),
        FileType::Wav => Some("audio/wav"),
        FileType::Mp4 => Some("audio/mp4"),
        FileType::Aiff => Some("audio/aiff"),
        _ => None,
    }
}

/// Type MIME déduit du contenu du fichier (tag ID3v2 éventuel sauté)
pub async fn detect_mime(path: &Path) -> Result<Option<&'static str>> {
    let path = path.to_path_buf();
    let guessed = tokio::task::spawn_blocking(move || -> std::io::Result<Option<FileType>> {
        let reader = std::io::BufReader::new(std::fs::File::open(&path)?);
        Ok(Probe::new(reader).guess_file_type()?.file_type())
    })
    .await
    .map_err(|e| VkError::Other(format!("Format detection task failed: {}", e)))??;

    Ok(guessed.and_then(mime_of))
}

/// Longueur du tag ID3v2 en tête de fichier, en-tête et pied compris
fn id3v2_len(head: &[u8]) -> u64 {
    if head.len() < 10 || !head.starts_with(b"ID3") {
        return 0;
    }
    // Taille « synchsafe » : 7 bits utiles par octet
    let size = &head[6..10];
    if size.iter().any(|b| b & 0x80 != 0) {
        return 0;
    }
    let size = size.iter().fold(0u64, |acc, b| (acc << 7) | u64::from(*b));
    let footer = if head[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

/// md5 des données audio, tag ID3v2 de tête exclu
///
/// Le fichier tagué garde ainsi l'empreinte du contenu reçu.
pub async fn audio_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = [0u8; 10];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let mut hasher = Md5::new();
    match id3v2_len(&head[..filled]) {
        0 => hasher.update(&head[..filled]),
        skip => {
            file.seek(SeekFrom::Start(skip)).await?;
        }
    }

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Contrôle de type et liste de blocage appliqués avant de servir un fichier
#[derive(Debug, Clone)]
pub struct MediaValidator {
    allowed_mime: Vec<String>,
    blocked_hashes: HashSet<String>,
}

impl MediaValidator {
    pub fn new(settings: &DownloadSettings) -> Self {
        Self {
            allowed_mime: settings.allowed_mime.clone(),
            blocked_hashes: settings
                .blocked_hashes
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
        }
    }

    /// Vérifie le fichier ; un fichier rejeté est supprimé
    ///
    /// Le même contrôle s'applique au fichier frais et au fichier déjà
    /// tagué en cache : l'empreinte ignore le tag ID3v2.
    pub async fn validate(&self, path: &Path) -> Result<()> {
        let reason = match detect_mime(path).await? {
            Some(mime) if self.allowed_mime.iter().any(|m| m == mime) => {
                let hash = audio_md5(path).await?;
                if self.blocked_hashes.contains(&hash) {
                    Some(format!("blocked content {}", hash))
                } else {
                    None
                }
            }
            Some(mime) => Some(format!("unexpected content type {}", mime)),
            None => Some("unknown content type".to_string()),
        };

        match reason {
            None => Ok(()),
            Some(reason) => {
                warn!("Rejecting {}: {}", path.display(), reason);
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
                Err(VkError::NotFound(format!("invalid media ({})", reason)))
            }
        }
    }
}

/// Écrit les tags ID3v2 artiste et titre ; un échec est seulement journalisé
pub async fn write_tags(path: &Path, item: &AudioItem) {
    let path_buf = path.to_path_buf();
    let artist = item.artist.clone();
    let title = item.title.clone();

    let result = tokio::task::spawn_blocking(move || {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.set_artist(artist);
        tag.set_title(title);
        tag.save_to_path(&path_buf, WriteOptions::default())
    })
    .await;

    match result {
        Ok(Ok(())) => debug!("Tagged {}", path.display()),
        Ok(Err(e)) => warn!("Failed to tag {}: {}", path.display(), e),
        Err(e) => warn!("Tagging task failed for {}: {}", path.display(), e),
    }
}

/// Un fichier prêt à être servi
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    /// Nom présenté au client
    pub file_name: String,
    pub size: u64,
}

impl MediaFile {
    pub async fn open(path: PathBuf, file_name: String) -> Result<Self> {
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            path,
            file_name,
            size,
        })
    }

    /// En-têtes de réponse ; `Content-Length` seulement hors streaming
    pub fn headers(&self, streaming: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
        if let Ok(value) = HeaderValue::from_str(&content_disposition(&self.file_name)) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        if !streaming {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.size));
        }
        headers
    }
}

/// `attachment` avec un nom ASCII de repli et le nom UTF-8 complet
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(file_name, ATTR_CHAR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(blocked: &[&str]) -> DownloadSettings {
        DownloadSettings {
            timeout: std::time::Duration::from_secs(5),
            directory: PathBuf::new(),
            allowed_mime: vec!["audio/mpeg".to_string()],
            blocked_hashes: blocked.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Trames MPEG-1 couche III à 128 kb/s, 44,1 kHz
    fn mpeg_frames(count: usize) -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        frame.repeat(count)
    }

    fn with_id3(payload: &[u8], tag_size: u8) -> Vec<u8> {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00".to_vec();
        data.push(tag_size);
        data.extend(std::iter::repeat_n(0u8, tag_size as usize));
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_id3v2_len() {
        assert_eq!(id3v2_len(b"ID3\x04\x00\x00\x00\x00\x00\x00"), 10);
        assert_eq!(id3v2_len(b"ID3\x04\x00\x00\x00\x00\x01\x7F"), 10 + 255);
        // Pied de tag annoncé par le drapeau 0x10
        assert_eq!(id3v2_len(b"ID3\x04\x00\x10\x00\x00\x00\x05"), 25);
        // Taille invalide : pas un tag
        assert_eq!(id3v2_len(b"ID3\x04\x00\x00\x80\x00\x00\x00"), 0);
        assert_eq!(id3v2_len(b"ID3"), 0);
        assert_eq!(id3v2_len(&[0xFF, 0xFB, 0x90, 0x00]), 0);
    }

    #[tokio::test]
    async fn test_detect_mime() {
        let dir = tempfile::tempdir().unwrap();
        let check = |name: &str, data: Vec<u8>| {
            let path = dir.path().join(name);
            std::fs::write(&path, data).unwrap();
            path
        };

        let mp3 = check("a.part", mpeg_frames(4));
        assert_eq!(detect_mime(&mp3).await.unwrap(), Some("audio/mpeg"));
        let tagged = check("b.part", with_id3(&mpeg_frames(4), 32));
        assert_eq!(detect_mime(&tagged).await.unwrap(), Some("audio/mpeg"));
        let flac = check("c.part", b"fLaC\x00\x00\x00\x22".to_vec());
        assert_eq!(detect_mime(&flac).await.unwrap(), Some("audio/flac"));
        // Une page HTML nommée .mp3 reste une page HTML
        let html = check("d.mp3", b"<html>not found</html>".to_vec());
        assert_eq!(detect_mime(&html).await.unwrap(), None);
        let empty = check("e.mp3", Vec::new());
        assert_eq!(detect_mime(&empty).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_audio_md5_ignores_id3v2() {
        let dir = tempfile::tempdir().unwrap();
        let payload = mpeg_frames(3);
        let raw = dir.path().join("raw.mp3");
        let tagged = dir.path().join("tagged.mp3");
        std::fs::write(&raw, &payload).unwrap();
        std::fs::write(&tagged, with_id3(&payload, 64)).unwrap();

        let expected = vkutils::md5(payload.as_slice());
        assert_eq!(audio_md5(&raw).await.unwrap(), expected);
        assert_eq!(audio_md5(&tagged).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_validate_accepts_mpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.mp3");
        std::fs::write(&path, mpeg_frames(4)).unwrap();

        MediaValidator::new(&settings(&[])).validate(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_tags_keep_blocked_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholder.mp3");
        let payload = mpeg_frames(8);
        std::fs::write(&path, &payload).unwrap();

        let item = AudioItem {
            id: "4fe42a16".to_string(),
            artist: "Coldplay".to_string(),
            title: "Yellow".to_string(),
            duration: 269,
            mp3: String::new(),
            user_id: None,
        };
        write_tags(&path, &item).await;
        assert!(std::fs::read(&path).unwrap().starts_with(b"ID3"));

        let validator = MediaValidator::new(&settings(&[&vkutils::md5(payload.as_slice())]));
        assert!(validator.validate(&path).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_validate_rejects_and_deletes() {
        let dir = tempfile::tempdir().unwrap();

        let html = dir.path().join("error.mp3");
        std::fs::write(&html, b"<html>not found</html>").unwrap();
        let err = MediaValidator::new(&settings(&[])).validate(&html).await.unwrap_err();
        assert_eq!(err.error_code(), 404);
        assert!(!html.exists());

        let content = mpeg_frames(2);
        let blocked = dir.path().join("blocked.mp3");
        std::fs::write(&blocked, &content).unwrap();
        let hash = vkutils::md5(content.as_slice());
        let validator = MediaValidator::new(&settings(&[&hash.to_uppercase()]));
        assert!(validator.validate(&blocked).await.is_err());
        assert!(!blocked.exists());
    }

    #[tokio::test]
    async fn test_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, vec![0u8; 1234]).unwrap();
        let file = MediaFile::open(path, "Coldplay - Yellow.mp3".to_string()).await.unwrap();

        let buffered = file.headers(false);
        assert_eq!(buffered[CONTENT_LENGTH], "1234");
        assert_eq!(buffered[CONTENT_TYPE], "audio/mpeg");
        assert_eq!(buffered[CACHE_CONTROL], "private");

        let streamed = file.headers(true);
        assert!(streamed.get(CONTENT_LENGTH).is_none());
        assert!(streamed.contains_key(CONTENT_DISPOSITION));
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Coldplay - Yellow.mp3"),
            "attachment; filename=\"Coldplay - Yellow.mp3\"; filename*=UTF-8''Coldplay%20-%20Yellow.mp3"
        );
        assert_eq!(
            content_disposition("Кино - Группа крови.mp3"),
            concat!(
                "attachment; filename=\"____ - ______ _____.mp3\"; filename*=UTF-8''",
                "%D0%9A%D0%B8%D0%BD%D0%BE%20-%20",
                "%D0%93%D1%80%D1%83%D0%BF%D0%BF%D0%B0%20%D0%BA%D1%80%D0%BE%D0%B2%D0%B8.mp3"
            )
        );
    }
}
