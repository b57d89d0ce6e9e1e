//! Manipulation de l'arbre YAML de configuration
//!
//! Les clés sont comparées en minuscules : `HTTP_PORT` et `http_port`
//! désignent la même entrée.

use anyhow::{Result, anyhow};
use serde_yaml::{Mapping, Value};

/// Fusionne `overlay` dans `base`
///
/// Les tables sont fusionnées clé par clé ; un scalaire ou une liste de
/// `overlay` remplace la valeur de `base`.
pub(crate) fn merge(base: &mut Value, overlay: &Value) {
    let (Value::Mapping(base_map), Value::Mapping(overlay_map)) = (&mut *base, overlay) else {
        *base = overlay.clone();
        return;
    };

    for (key, value) in overlay_map {
        match base_map.get_mut(key) {
            Some(existing) => merge(existing, value),
            None => {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Passe récursivement toutes les clés textuelles en minuscules
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, child)| {
                    let key = match key {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lowercase_keys(child))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

fn key(segment: &str) -> Value {
    Value::String(segment.to_lowercase())
}

/// Valeur au chemin `path`
pub(crate) fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value> {
    path.iter().enumerate().try_fold(root, |node, (depth, segment)| {
        let Value::Mapping(map) = node else {
            return Err(anyhow!("{} is not a table", path[..depth].join(".")));
        };
        map.get(key(segment))
            .ok_or_else(|| anyhow!("{} is not set", path[..=depth].join(".")))
    })
}

/// Écrit `value` au chemin `path`, en créant les tables intermédiaires
pub(crate) fn insert(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = match node {
            Value::Mapping(map) => map
                .entry(key(segment))
                .or_insert_with(|| Value::Mapping(Mapping::new())),
            _ => {
                return Err(anyhow!("cannot set {}: {} is not a table", path.join("."), segment));
            }
        };
    }

    match node {
        Value::Mapping(map) => {
            map.insert(key(last), value);
            Ok(())
        }
        _ => Err(anyhow!("cannot set {}: parent is not a table", path.join("."))),
    }
}

/// Applique les surcharges `PREFIX` + `A__B__C=valeur`
///
/// La valeur est lue comme du YAML (`8080` devient un nombre, `true` un
/// booléen) ; à défaut elle est gardée telle quelle.
pub(crate) fn apply_overrides<I>(root: &mut Value, prefix: &str, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        let path: Vec<&str> = rest.split("__").filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            continue;
        }

        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw.clone()));
        if let Err(e) = insert(root, &path, value) {
            tracing::warn!("Ignoring {}: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_replaces_leaves_and_keeps_siblings() {
        let mut base = yaml("a: 1\nb:\n  c: 2\n  l: [1, 2]\n");
        merge(&mut base, &yaml("b:\n  c: 5\n  d: 6\n  l: [3]\n"));

        assert_eq!(lookup(&base, &["a"]).unwrap(), &Value::from(1));
        assert_eq!(lookup(&base, &["b", "c"]).unwrap(), &Value::from(5));
        assert_eq!(lookup(&base, &["b", "d"]).unwrap(), &Value::from(6));
        assert_eq!(lookup(&base, &["b", "l"]).unwrap(), &yaml("[3]"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let root = lowercase_keys(yaml("Host:\n  HTTP_PORT: 9000\n"));
        assert_eq!(lookup(&root, &["HOST", "http_port"]).unwrap(), &Value::from(9000));
        assert!(lookup(&root, &["host", "missing"]).is_err());
        assert!(lookup(&root, &["host", "http_port", "deeper"]).is_err());
    }

    #[test]
    fn test_insert_creates_tables() {
        let mut root = yaml("{}");
        insert(&mut root, &["cache", "audio_info", "ttl"], Value::from(10)).unwrap();
        assert_eq!(lookup(&root, &["cache", "audio_info", "ttl"]).unwrap(), &Value::from(10));

        assert!(insert(&mut root, &["cache", "audio_info", "ttl", "x"], Value::Null).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut root = yaml("host:\n  http_port: 8000\n");
        apply_overrides(
            &mut root,
            "APP__",
            vec![
                ("APP__HOST__HTTP_PORT".to_string(), "9100".to_string()),
                ("APP__SEARCH__POPULAR_ENABLED".to_string(), "true".to_string()),
                ("APP__VK__USER_AGENT".to_string(), "agent: {".to_string()),
                ("OTHER__HOST__HTTP_PORT".to_string(), "1".to_string()),
            ],
        );

        assert_eq!(lookup(&root, &["host", "http_port"]).unwrap(), &Value::from(9100));
        assert_eq!(lookup(&root, &["search", "popular_enabled"]).unwrap(), &Value::Bool(true));
        assert_eq!(
            lookup(&root, &["vk", "user_agent"]).unwrap(),
            &Value::String("agent: {".to_string())
        );
    }
}
