use reqwest::Proxy;
use serde::Deserialize;
use url::Url;

use crate::error::DownloadError;

/// Proxy configuration types
#[derive(Debug, Clone, PartialEq, Eq, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// HTTP proxy
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// Proxy authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Parses `scheme://[user:pass@]host:port`.
    ///
    /// The scheme selects the proxy type; credentials embedded in the URL are
    /// moved into [`ProxyAuth`].
    pub fn parse(input: &str) -> Result<Self, DownloadError> {
        let mut url = Url::parse(input)
            .map_err(|e| DownloadError::proxy_configuration(format!("invalid proxy URL `{input}`: {e}")))?;

        let proxy_type = match url.scheme() {
            "http" => ProxyType::Http,
            "https" => ProxyType::Https,
            "socks5" | "socks5h" => ProxyType::Socks5,
            other => {
                return Err(DownloadError::proxy_configuration(format!(
                    "unsupported proxy scheme `{other}`"
                )));
            }
        };

        let auth = if url.username().is_empty() {
            None
        } else {
            Some(ProxyAuth {
                username: url.username().to_string(),
                password: url.password().unwrap_or_default().to_string(),
            })
        };
        // Stripping credentials cannot fail for hierarchical URLs.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self {
            url: url.to_string().trim_end_matches('/').to_string(),
            proxy_type,
            auth,
        })
    }
}

/// Build a reqwest Proxy object from our proxy configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, DownloadError> {
    let proxy_url = &config.url;

    // HTTP and HTTPS proxies tunnel every scheme; the type only tells how to reach the proxy.
    let mut proxy = match config.proxy_type {
        ProxyType::Http | ProxyType::Https => Proxy::all(proxy_url).map_err(|e| {
            DownloadError::proxy_configuration(format!("invalid HTTP proxy URL: {e}"))
        })?,
        ProxyType::Socks5 => {
            let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://")
            {
                proxy_url.to_string()
            } else {
                format!("socks5://{proxy_url}")
            };

            Proxy::all(&url).map_err(|e| {
                DownloadError::proxy_configuration(format!("invalid SOCKS5 proxy URL: {e}"))
            })?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}
