use gemrelay_store::ConfigStore;
use http::HeaderMap;

use crate::error::ProxyError;

/// The resolved proxy access key and its translation-affecting settings.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub name: Option<String>,
    pub safety_enabled: bool,
}

/// `Authorization: Bearer <key>` wins; `x-api-key` is accepted as a
/// fallback for clients that cannot set an Authorization header.
pub fn extract_access_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_owned());
    }
    if let Some(value) = headers.get("x-api-key")
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim().to_owned());
    }
    None
}

pub async fn authenticate(
    headers: &HeaderMap,
    config: &ConfigStore,
) -> Result<AccessContext, ProxyError> {
    let key = extract_access_key(headers).ok_or(ProxyError::Auth)?;
    let access_keys = config.access_keys().await?;
    let entry = access_keys.get(&key).ok_or(ProxyError::Auth)?;
    Ok(AccessContext {
        name: entry.name.clone(),
        safety_enabled: entry.safety_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-bearer"),
        );
        headers.insert("x-api-key", HeaderValue::from_static("sk-fallback"));
        assert_eq!(extract_access_key(&headers).as_deref(), Some("sk-bearer"));
    }

    #[test]
    fn x_api_key_is_accepted_alone() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-fallback"));
        assert_eq!(extract_access_key(&headers).as_deref(), Some("sk-fallback"));
    }

    #[test]
    fn missing_credentials_yield_none() {
        assert_eq!(extract_access_key(&HeaderMap::new()), None);
    }
}
