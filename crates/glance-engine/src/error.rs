use thiserror::Error;

/// An upload that could not become the session image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("uploaded file is empty")]
    Empty,

    #[error("unsupported file type '.{0}' (expected PNG, JPG or JPEG)")]
    UnsupportedExtension(String),

    #[error("image is {size} bytes, larger than the {limit} byte upload limit")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported image format (expected PNG or JPEG content)")]
    UnsupportedFormat,

    #[error("could not decode image: {0}")]
    Decode(String),
}

/// Any failure of the outbound model call. Failure causes are deliberately
/// not distinguished; the message carries the flattened cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExternalServiceError {
    message: String,
}

impl ExternalServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::new(error_chain_text(err, 1024))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ExternalServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(&err)
    }
}

/// Flattens an error and its causes into one line, dropping blank and
/// repeated messages.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut causes: Vec<String> = err
        .chain()
        .map(|cause| cause.to_string().trim().to_owned())
        .filter(|text| !text.is_empty())
        .collect();
    causes.dedup();
    let text = if causes.is_empty() {
        err.to_string()
    } else {
        causes.join(" | caused by: ")
    };
    truncate_text(&text, max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &value[..cut]),
        None => value.to_string(),
    }
}
