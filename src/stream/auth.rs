//! Authorization header wiring for the stream gateway client.

use anyhow::{Context, Result};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

pub(crate) fn build_bearer_headers(token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("failed to build Authorization header")?;
        value.set_sensitive(true);
        headers.insert("Authorization", value);
    }
    Ok(headers)
}
