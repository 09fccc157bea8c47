use serde_json::Value;

use crate::store::KvStore;

pub const USER_KEY: &str = "user_gemini_key";

/// Optional user-supplied API key. Its presence switches every generation to
/// direct mode.
#[derive(Debug, Clone)]
pub struct KeyStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> KeyStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Option<String> {
        self.store
            .get_str(USER_KEY)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn has_key(&self) -> bool {
        self.get().is_some()
    }

    pub fn set(&mut self, key: &str) -> anyhow::Result<()> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            anyhow::bail!("API key must not be empty");
        }
        self.store.set(USER_KEY, Value::String(trimmed.to_string()))
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.store.clear(USER_KEY)
    }
}

/// Masks a key for display, keeping the first and last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
