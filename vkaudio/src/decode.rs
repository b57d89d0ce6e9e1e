//! Déchiffrement des URL audio obfusquées
//!
//! Le site amont ne livre pas les URL des médias en clair : il renvoie une
//! URL factice contenant le marqueur `audio_api_unavailable` et un paramètre
//! `extra=<charge>#<clé>`. La clé, une fois décodée, est une liste de
//! commandes séparées par `\t` ; chaque commande est une lettre suivie
//! d'arguments séparés par `\x0b`. Les commandes sont appliquées à la charge
//! dans l'ordre inverse de la liste.
//!
//! L'identifiant du propriétaire (l'utilisateur connecté) est ajouté comme
//! dernier argument de chaque commande.
//!
//! Ce module est pur : aucune entrée/sortie, aucun état.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};

/// Marqueur présent dans toutes les URL chiffrées
pub const ENCRYPTED_MARKER: &str = "audio_api_unavailable";

const EXTRA_SEPARATOR: &str = "?extra=";
const KEY_SEPARATOR: char = '#';
const COMMAND_SEPARATOR: char = '\t';
const ARGUMENT_SEPARATOR: char = '\x0b';

/// Alphabet du décalage de César : le `O` et le `0` sont intervertis
const CAESAR_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMN0PQRSTUVWXYZO123456789+/=";

// Le site ne respecte ni le padding ni les bits de fin
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Une commande de la clé, avec ses arguments typés
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// `v` : renverse la chaîne
    Reverse,
    /// `x` : XOR de chaque point de code
    Xor(i64),
    /// `r` : décalage de César vers l'arrière
    Caesar(i64),
    /// `s` : permutation par échanges successifs
    Swap(i64),
    /// `i` : permutation dont la clé est le XOR des deux arguments
    Indirect(i64),
}

impl Command {
    /// Analyse un jeton `lettre\x0barg1\x0barg2...`
    ///
    /// `owner_id` est ajouté à la fin des arguments. Seuls les arguments
    /// effectivement utilisés sont convertis en entiers.
    fn parse(token: &str, owner_id: &str) -> Option<Self> {
        let mut parts = token.split(ARGUMENT_SEPARATOR);
        let name = parts.next()?;
        let mut args: Vec<&str> = parts.collect();
        args.push(owner_id);

        let int_arg = |i: usize| args.get(i).and_then(|a| parse_int(a));

        match name {
            "v" => Some(Command::Reverse),
            "x" => int_arg(0).map(Command::Xor),
            "r" => int_arg(0).map(Command::Caesar),
            "s" => int_arg(0).map(Command::Swap),
            "i" => Some(Command::Indirect(int_arg(0)? ^ int_arg(1)?)),
            _ => None,
        }
    }

    fn apply(self, input: Vec<char>) -> Option<Vec<char>> {
        match self {
            Command::Reverse => Some(input.into_iter().rev().collect()),
            Command::Xor(key) => xor_decode(&input, key),
            Command::Caesar(key) => caesar_decode(&input, key),
            Command::Swap(key) | Command::Indirect(key) => Some(swap_decode(input, key)),
        }
    }
}

fn parse_int(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

/// Déchiffre une URL audio
///
/// Retourne `None` si l'URL n'est pas au format chiffré attendu, si une
/// commande est inconnue ou invalide, ou si le résultat n'est pas une URL
/// `http`.
///
/// # Exemple
///
/// ```
/// use vkaudio::decode::decrypt;
///
/// assert_eq!(decrypt("https://example.com/plain.mp3", "1"), None);
/// ```
pub fn decrypt(encoded_url: &str, owner_id: &str) -> Option<String> {
    if encoded_url.is_empty() || !encoded_url.contains(ENCRYPTED_MARKER) {
        return None;
    }

    let extra = encoded_url.split(EXTRA_SEPARATOR).nth(1)?;
    let mut pieces = extra.split(KEY_SEPARATOR);
    let (payload, key) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(payload), Some(key), None) => (payload, key),
        _ => return None,
    };
    if key.is_empty() {
        return None;
    }

    let mut decoded: Vec<char> = base64_based_decode(payload)?.chars().collect();
    let commands = base64_based_decode(key)?;

    for token in commands.split(COMMAND_SEPARATOR).rev() {
        let command = Command::parse(token, owner_id)?;
        decoded = command.apply(decoded)?;
    }

    let decoded: String = decoded.into_iter().collect();
    decoded.starts_with("http").then_some(decoded)
}

/// Base64 avec la casse inversée et `O`/`0` permutés
fn base64_based_decode(encoded: &str) -> Option<String> {
    let mut fixed: String = encoded
        .chars()
        .map(|c| match c {
            'O' => '0',
            '0' => 'o',
            c if c.is_lowercase() => c.to_ascii_uppercase(),
            c => c.to_ascii_lowercase(),
        })
        .collect();

    while fixed.len() % 4 != 0 {
        fixed.push('=');
    }

    let bytes = BASE64.decode(fixed.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

fn xor_decode(input: &[char], key: i64) -> Option<Vec<char>> {
    input
        .iter()
        .map(|&c| {
            let code = (c as i64) ^ key;
            u32::try_from(code).ok().and_then(char::from_u32)
        })
        .collect()
}

fn caesar_decode(input: &[char], key: i64) -> Option<Vec<char>> {
    let alphabet: Vec<char> = CAESAR_ALPHABET.chars().collect();
    let len = alphabet.len() as i64;
    let doubled = len * 2;

    input
        .iter()
        .map(|&c| match alphabet.iter().position(|&a| a == c) {
            None => Some(c),
            Some(idx) => {
                // L'index suit la sémantique d'un alphabet doublé : un seul tour
                // de repli est permis dans chaque sens
                let mut j = (idx as i64).checked_sub(key)?;
                if j < 0 {
                    j += doubled;
                }
                if !(0..doubled).contains(&j) {
                    return None;
                }
                Some(alphabet[(j % len) as usize])
            }
        })
        .collect()
}

/// Calcule les index d'échange : `k ← (n·(i+1)) XOR (k+i) mod n`, i décroissant
fn swap_indexes(length: usize, key: i64) -> Vec<usize> {
    let n = length as u128;
    let mut k = u128::from(key.unsigned_abs());
    let mut indexes = vec![0usize; length];

    for i in (0..length).rev() {
        let i128 = i as u128;
        k = ((n * (i128 + 1)) ^ (k + i128)) % n;
        indexes[i] = k as usize;
    }

    indexes
}

fn swap_decode(mut input: Vec<char>, key: i64) -> Vec<char> {
    let n = input.len();
    if n == 0 {
        return input;
    }

    let indexes = swap_indexes(n, key);
    for i in 1..n {
        let j = indexes[n - 1 - i];
        input.swap(i, j);
    }
    input
}
