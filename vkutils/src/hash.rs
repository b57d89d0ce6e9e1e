//! Hachage de contenu pour les clés de cache et les noms de fichiers.
//!
//! Toutes les fonctions retournent un digest hexadécimal en minuscules, stable
//! d'un processus à l'autre : les clés servent de noms de fichiers sur disque.

use ::md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Algorithme utilisé pour dériver une clé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// CRC32, 8 caractères hexadécimaux
    #[default]
    Crc32,
    /// MD5, 32 caractères hexadécimaux
    Md5,
}

impl HashKind {
    /// Hache une donnée quelconque avec cet algorithme
    pub fn digest(self, data: impl AsRef<[u8]>) -> String {
        match self {
            HashKind::Crc32 => crc32(data),
            HashKind::Md5 => md5(data),
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Crc32 => f.write_str("crc32"),
            HashKind::Md5 => f.write_str("md5"),
        }
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crc32" => Ok(HashKind::Crc32),
            "md5" => Ok(HashKind::Md5),
            other => Err(format!("Unknown hash algorithm: {}", other)),
        }
    }
}

/// CRC32 (IEEE) formaté sur 8 caractères
pub fn crc32(data: impl AsRef<[u8]>) -> String {
    format!("{:08x}", crc32fast::hash(data.as_ref()))
}

/// MD5 hexadécimal
pub fn md5(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Point d'entrée unique : hache `data` avec l'algorithme choisi en configuration
pub fn uni_hash(kind: HashKind, data: impl AsRef<[u8]>) -> String {
    kind.digest(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_values() {
        assert_eq!(crc32("Coldplay.0"), "4fe42a16");
        assert_eq!(crc32("123_456"), "e1cc10ff");
        assert_eq!(crc32(""), "00000000");
    }

    #[test]
    fn test_md5_known_values() {
        assert_eq!(md5("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5(b"random"), "7ddf32e17a6ac5ce04a8ecbf782ca509");
    }

    #[test]
    fn test_uni_hash_dispatch() {
        assert_eq!(uni_hash(HashKind::Crc32, "abc"), crc32("abc"));
        assert_eq!(uni_hash(HashKind::Md5, "abc").len(), 32);
    }

    #[test]
    fn test_hash_kind_parsing() {
        assert_eq!("CRC32".parse::<HashKind>(), Ok(HashKind::Crc32));
        assert_eq!(" md5 ".parse::<HashKind>(), Ok(HashKind::Md5));
        assert!("sha1".parse::<HashKind>().is_err());
        assert_eq!(HashKind::Md5.to_string(), "md5");
    }
}
