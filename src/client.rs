//! HTTP client for talking to a started daemon.
//!
//! [`ServiceClient`] is bound to the daemon's base URL and carries the
//! session defaults (timeout and headers), so tests only write paths:
//!
//! ```ignore
//! let client = session.create_service_client("http://127.0.0.1:8080/api/")?;
//! let users = client.get("users").await?.json::<Vec<User>>().await?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Errors from building or using a [`ServiceClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid path '{path}': {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid default header '{name}'")]
    InvalidHeader { name: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Settings for a [`ServiceClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Per-request timeout. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Headers added to every request.
    pub default_headers: BTreeMap<String, String>,
}

/// Client bound to one daemon base URL.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    base_url: Url,
    client: reqwest::Client,
}

impl ServiceClient {
    /// Build a client for `base_url`.
    ///
    /// A missing trailing slash is added, so relative paths always resolve
    /// below the base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not absolute HTTP(S), a default header
    /// is not a valid header, or the HTTP client cannot be built.
    pub fn new(base_url: &str, options: &ClientOptions) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.default_headers {
            let invalid = || ClientError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .no_proxy();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url,
            client: builder.build()?,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL. Leading slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidPath`] if the result is not a valid URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| ClientError::InvalidPath {
                path: path.to_string(),
                source,
            })
    }

    /// Start a request with an arbitrary method.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidPath`] if `path` does not resolve.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.request(method, self.url(path)?))
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the request fails. Non-2xx
    /// statuses are returned as responses, not errors.
    pub async fn get(&self, path: &str) -> Result<Response> {
        Ok(self.request(Method::GET, path)?.send().await?)
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid, the body cannot be
    /// serialised, or the request fails.
    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        Ok(self.request(Method::POST, path)?.json(body).send().await?)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let invalid = |reason: String| ClientError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
