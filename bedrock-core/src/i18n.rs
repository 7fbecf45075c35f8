//! Message bundles keyed by locale.
//!
//! Bundles are `<locale>.json` files; nested objects are flattened into
//! dotted keys (`{"notes":{"created":"..."}}` -> `notes.created`).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Translator {
    default_locale: String,
    bundles: HashMap<String, HashMap<String, String>>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new("en")
    }
}

impl Translator {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: normalize(&default_locale.into()),
            bundles: HashMap::new(),
        }
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut locales: Vec<&str> = self.bundles.keys().map(|s| s.as_str()).collect();
        locales.sort_unstable();
        locales
    }

    /// Merge messages into a locale. Later bundles override earlier keys.
    pub fn add_bundle(&mut self, locale: &str, messages: &Value) {
        let entry = self.bundles.entry(normalize(locale)).or_default();
        flatten("", messages, entry);
    }

    /// Load every `*.json` file of `dir`; the file stem is the locale.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading i18n directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading bundle {}", path.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("parsing bundle {}", path.display()))?;
            self.add_bundle(locale, &value);
            loaded += 1;
        }

        tracing::debug!(dir = %dir.display(), bundles = loaded, "i18n bundles loaded");
        Ok(loaded)
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        self.bundles
            .get(locale)
            .and_then(|b| b.get(key))
            .map(|s| s.as_str())
    }

    /// Resolve `key` for `locale`, falling back to the bare language, then
    /// the default locale, then the key itself.
    pub fn translate(&self, locale: &str, key: &str, args: &[(&str, &str)]) -> String {
        let locale = normalize(locale);
        let language = locale.split('-').next().unwrap_or(&locale);

        let template = self
            .lookup(&locale, key)
            .or_else(|| self.lookup(language, key))
            .or_else(|| self.lookup(&self.default_locale, key))
            .unwrap_or(key);

        args.iter().fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    }

    /// Pick the best loaded locale for an `Accept-Language` header.
    pub fn negotiate(&self, accept_language: Option<&str>) -> String {
        let Some(header) = accept_language else {
            return self.default_locale.clone();
        };

        let mut candidates: Vec<(String, f32)> = header
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.trim().split(';');
                let tag = normalize(pieces.next()?.trim());
                if tag.is_empty() || tag == "*" {
                    return None;
                }
                let q = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((tag, q))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (tag, _) in candidates {
            if self.bundles.contains_key(&tag) {
                return tag;
            }
            let language = tag.split('-').next().unwrap_or(&tag);
            if self.bundles.contains_key(language) {
                return language.to_string();
            }
        }
        self.default_locale.clone()
    }
}

fn normalize(locale: &str) -> String {
    locale.trim().replace('_', "-").to_lowercase()
}

fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}
