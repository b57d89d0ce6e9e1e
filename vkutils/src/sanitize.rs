/// Nettoie une chaîne pour l'utiliser comme nom de fichier.
///
/// Les séparateurs de chemin, caractères réservés (Windows compris) et
/// caractères de contrôle sont remplacés par `_`, les espaces multiples
/// sont fusionnés et les points/espaces de bord sont retirés.
///
/// * `to_lower` - passe le résultat en minuscules
/// * `alpha_numeric_only` - ne conserve que lettres, chiffres, espaces, `-` et `_`
///
/// # Exemples
///
/// ```
/// use vkutils::sanitize;
///
/// assert_eq!(sanitize("AC/DC - Back: In Black", false, false), "AC_DC - Back_ In Black");
/// ```
pub fn sanitize(name: &str, to_lower: bool, alpha_numeric_only: bool) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_space = false;

    for c in name.chars() {
        let c = if c.is_whitespace() {
            ' '
        } else if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        {
            '_'
        } else if alpha_numeric_only && !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_')) {
            continue;
        } else {
            c
        };

        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
            result.push(' ');
        } else {
            last_space = false;
            result.push(c);
        }
    }

    let trimmed = result.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if to_lower {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}
