use thiserror::Error;

pub const GENERIC_TRANSPORT_MESSAGE: &str =
    "Could not reach the image generation service. Please try again.";

/// Every failure a generation can end in. Each variant renders as a single
/// message suitable for display.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    MissingInput(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UpstreamRejection(String),
    /// Network or decoding failure. `detail` carries the error chain for
    /// logs and is never shown to users.
    #[error("{message}")]
    Transport { message: String, detail: String },
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Storage(String),
}

impl GenerationError {
    pub fn transport(err: &anyhow::Error) -> Self {
        Self::Transport {
            message: GENERIC_TRANSPORT_MESSAGE.to_string(),
            detail: chain_detail(err, 480),
        }
    }

    pub fn transport_with(message: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Transport {
            message: message.into(),
            detail: chain_detail(err, 480),
        }
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::Storage(format!(
            "Could not save to local storage: {}",
            chain_detail(err, 220)
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::MissingInput(_) => "missing_input",
            GenerationError::Configuration(_) => "configuration",
            GenerationError::Validation(_) => "validation",
            GenerationError::UpstreamRejection(_) => "upstream_rejection",
            GenerationError::Transport { .. } => "transport",
            GenerationError::QuotaExceeded(_) => "quota_exceeded",
            GenerationError::Storage(_) => "storage",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GenerationError::MissingInput(_) | GenerationError::Validation(_) => 400,
            GenerationError::QuotaExceeded(_) => 429,
            GenerationError::Configuration(_)
            | GenerationError::UpstreamRejection(_)
            | GenerationError::Transport { .. }
            | GenerationError::Storage(_) => 500,
        }
    }

    /// Log-oriented text: the display message plus transport detail.
    pub fn log_text(&self) -> String {
        match self {
            GenerationError::Transport { message, detail } if !detail.is_empty() => {
                format!("{message} ({detail})")
            }
            other => other.to_string(),
        }
    }
}

/// Single-line form of `text`, cut to `limit` characters.
pub(crate) fn clip(text: &str, limit: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

/// `outer: cause: root` with repeated links dropped, for log detail.
pub(crate) fn chain_detail(err: &anyhow::Error, limit: usize) -> String {
    let mut links: Vec<String> = Vec::new();
    for link in err.chain().map(|cause| clip(&cause.to_string(), limit)) {
        if !link.is_empty() && links.last() != Some(&link) {
            links.push(link);
        }
    }
    clip(&links.join(": "), limit)
}
