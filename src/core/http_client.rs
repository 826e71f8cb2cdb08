use modelget_core::models::settings::{DownloadSettings, ProxySettings};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::core::errors::{DownloadError, DownloadResult};

pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client shared by every job of a manager. Timeouts are applied per
/// request by the fetcher, not here.
pub fn build_client(
    settings: &DownloadSettings,
    proxy: &ProxySettings,
) -> DownloadResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = settings.auth_token.as_deref().filter(|t| !t.is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            DownloadError::Config("auth token contains invalid header characters".into())
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let builder = reqwest::Client::builder()
        .user_agent(concat!("modelget/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .connect_timeout(std::time::Duration::from_secs(30));

    apply_proxy(builder, proxy).build().map_err(|e| {
        DownloadError::CapabilityUnavailable(format!("HTTP client could not be built: {}", e))
    })
}

/// The native fetcher needs an http(s) endpoint to build URLs against.
pub fn endpoint_usable(endpoint: &str) -> bool {
    url::Url::parse(endpoint)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
