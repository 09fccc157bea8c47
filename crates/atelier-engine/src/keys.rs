use atelier_contracts::credentials::KeyStore;
use atelier_contracts::store::KvStore;

use crate::error::GenerationError;
use crate::transport::UpstreamTransport;

/// Checks `key` with a minimal text-only call and, when the upstream accepts
/// it, stores the trimmed key. Nothing is written on failure.
pub fn verify_and_store<S: KvStore>(
    transport: &dyn UpstreamTransport,
    store: &mut KeyStore<S>,
    key: &str,
) -> Result<(), GenerationError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(GenerationError::Validation(
            "Please enter an API key.".to_string(),
        ));
    }
    verify_key(transport, key)?;
    store.set(key).map_err(|err| GenerationError::storage(&err))
}

pub fn verify_key(transport: &dyn UpstreamTransport, key: &str) -> Result<(), GenerationError> {
    transport.check_key(key).map_err(classify_key_failure)
}

fn classify_key_failure(err: GenerationError) -> GenerationError {
    let friendly = match &err {
        GenerationError::UpstreamRejection(message) => friendly_key_message(message),
        _ => None,
    };
    match friendly {
        Some(message) => GenerationError::Validation(message.to_string()),
        None => err,
    }
}

fn friendly_key_message(message: &str) -> Option<&'static str> {
    let lowered = message.to_ascii_lowercase();
    if message.contains("API_KEY_INVALID") || lowered.contains("api key not valid") {
        Some("Invalid API key. Check that you copied the whole key.")
    } else if lowered.contains("quota") {
        Some("This API key has exhausted its quota. Try again later or use a different key.")
    } else if message.contains("API key not found") {
        Some("API key not found. Check that the key belongs to an active project.")
    } else {
        None
    }
}
