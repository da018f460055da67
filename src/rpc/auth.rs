//! HTTP headers for endpoints guarded by basic authentication.

use crate::rpc::options::BasicAuth;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

pub(crate) fn build_auth_headers(auth: Option<&BasicAuth>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(auth) = auth else {
        return Ok(headers);
    };

    let encoded = BASE64_STANDARD.encode(format!("{}:{}", auth.user, auth.password));
    let value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;
    headers.insert("Authorization", value);
    Ok(headers)
}
