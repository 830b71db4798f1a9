//! `reqwest`-backed [`Fetcher`] for repositories served over HTTP(S).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::fetch::{FetchError, Fetcher, MetadataRequest, TargetRequest};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options governing how the HTTP fetcher is constructed.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Directory URL under which metadata files are published.
    pub metadata_base_url: String,
    /// Directory URL under which target files are published.
    pub targets_base_url: String,
    /// Defaults to `tuf-client-core/<version>`.
    pub user_agent: Option<String>,
    pub timeout: Duration,
    /// Whether plaintext (HTTP) endpoints are allowed.
    pub allow_plaintext: bool,
}

impl HttpFetcherConfig {
    pub fn new(metadata_base_url: impl Into<String>, targets_base_url: impl Into<String>) -> Self {
        Self {
            metadata_base_url: metadata_base_url.into(),
            targets_base_url: targets_base_url.into(),
            user_agent: None,
            timeout: DEFAULT_TIMEOUT,
            allow_plaintext: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    metadata_base: Url,
    targets_base: Url,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let metadata_base = parse_base(&config.metadata_base_url, config.allow_plaintext)?;
        let targets_base = parse_base(&config.targets_base_url, config.allow_plaintext)?;

        let user_agent = config
            .user_agent
            .unwrap_or_else(|| format!("tuf-client-core/{}", env!("CARGO_PKG_VERSION")));
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .map_err(|_| FetchError::Transport(format!("invalid user agent {user_agent:?}")))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            metadata_base,
            targets_base,
        })
    }

    pub fn metadata_base(&self) -> &Url {
        &self.metadata_base
    }

    async fn fetch_bounded(&self, url: Url, limit: u64) -> Result<Vec<u8>, FetchError> {
        let resource = url.to_string();
        debug!(url = %resource, limit, "tuf: fetching");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(&resource, err))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                return Err(FetchError::NotFound(resource))
            }
            status => {
                return Err(FetchError::Status {
                    resource,
                    status: status.as_u16(),
                })
            }
        }

        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(FetchError::LengthExceeded { resource, limit });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| transport_error(&resource, err))?
        {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::LengthExceeded { resource, limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_metadata(
        &self,
        request: &MetadataRequest,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let url = join(&self.metadata_base, &request.file_name())?;
        self.fetch_bounded(url, max_length).await
    }

    async fn fetch_target(
        &self,
        request: &TargetRequest,
        length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let url = join(&self.targets_base, &request.file_path())?;
        self.fetch_bounded(url, length).await
    }
}

fn parse_base(raw: &str, allow_plaintext: bool) -> Result<Url, FetchError> {
    // Without a trailing slash `Url::join` would replace the last segment.
    let normalised = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalised).map_err(|err| FetchError::InvalidUrl(err.to_string()))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_plaintext => Ok(url),
        "http" => Err(FetchError::InvalidUrl(format!(
            "plaintext url requires explicit opt-in: {raw}"
        ))),
        other => Err(FetchError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

fn join(base: &Url, relative: &str) -> Result<Url, FetchError> {
    base.join(relative.trim_start_matches('/'))
        .map_err(|err| FetchError::InvalidUrl(err.to_string()))
}

fn transport_error(resource: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(resource.to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}
