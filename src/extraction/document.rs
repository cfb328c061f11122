use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

pub const MAX_DOCUMENT_ID_LEN: usize = 256;

/// Longest artifact key used verbatim. Leaves room for suffixes under the 255-byte
/// file name limit.
pub const MAX_ARTIFACT_KEY_LEN: usize = 200;
const HASHED_KEY_PREFIX_LEN: usize = MAX_ARTIFACT_KEY_LEN - 65;

/// Validated document identifier. Safe to use as a relative artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("record payload is not a valid document notification: {0}")]
    Payload(String),
    #[error("document id is empty")]
    EmptyId,
    #[error("document id is {len} bytes long (max {MAX_DOCUMENT_ID_LEN})")]
    IdTooLong { len: usize },
    #[error("document id {id:?} contains invalid character {ch:?}")]
    InvalidCharacter { id: String, ch: char },
    #[error("document id {0:?} must not start with '.' or '/' or contain '..'")]
    UnsafePath(String),
}

impl DocumentId {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        if raw.is_empty() {
            return Err(DocumentError::EmptyId);
        }
        if raw.len() > MAX_DOCUMENT_ID_LEN {
            return Err(DocumentError::IdTooLong { len: raw.len() });
        }
        if let Some(ch) = raw
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '/')))
        {
            return Err(DocumentError::InvalidCharacter {
                id: raw.to_owned(),
                ch,
            });
        }
        if raw.starts_with('.') || raw.starts_with('/') || raw.contains("..") {
            return Err(DocumentError::UnsafePath(raw.to_owned()));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Flat file name for the artifact. `%` is outside the id charset, so keys never collide.
    ///
    /// Keys that would exceed [`MAX_ARTIFACT_KEY_LEN`] keep a readable prefix and end
    /// in `~` plus the id's SHA-256; `~` is outside the charset too.
    pub fn artifact_key(&self) -> String {
        let escaped = self.0.replace('/', "%2F");
        if escaped.len() <= MAX_ARTIFACT_KEY_LEN {
            return escaped;
        }
        format!("{}~{}", &escaped[..HASHED_KEY_PREFIX_LEN], self.digest())
    }

    /// Hex SHA-256 of the raw id.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON body of a "document available" record.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPayload {
    pub document_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub locator: String,
}

/// Decodes a record payload. The locator is the explicit `location`, else
/// `{base_url}/pdf/{id}` when a base URL is configured, else the bare id.
pub fn decode_document(data: &[u8], base_url: Option<&str>) -> Result<Document, DocumentError> {
    let payload: DocumentPayload =
        serde_json::from_slice(data).map_err(|err| DocumentError::Payload(err.to_string()))?;
    let id = DocumentId::parse(&payload.document_id)?;

    let locator = match payload
        .location
        .map(|location| location.trim().to_owned())
        .filter(|location| !location.is_empty())
    {
        Some(location) => location,
        None => match base_url {
            Some(base) => format!("{}/pdf/{}", base.trim_end_matches('/'), id),
            None => id.to_string(),
        },
    };

    Ok(Document { id, locator })
}
