//! WebDAV transport.
//!
//! The HTTP client is abstracted behind [`DavClient`] so the same status
//! handling runs against a real server ([`ReqwestDavClient`](crate::ReqwestDavClient))
//! or the in-memory emulation ([`MemoryDav`](crate::MemoryDav)).

use crate::config::EndpointConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// WebDAV verbs used by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    /// Liveness and auth check.
    Options,
    /// Download.
    Get,
    /// Upload.
    Put,
    /// Create a collection.
    Mkcol,
}

impl DavMethod {
    /// The HTTP method token.
    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Options => "OPTIONS",
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Mkcol => "MKCOL",
        }
    }
}

/// Basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A single WebDAV request.
#[derive(Debug, Clone)]
pub struct DavRequest {
    /// Verb.
    pub method: DavMethod,
    /// Absolute URL.
    pub url: String,
    /// Request body, for `PUT`.
    pub body: Option<Vec<u8>>,
    /// Basic auth, when a user name is configured.
    pub credentials: Option<Credentials>,
}

/// A WebDAV response.
#[derive(Debug, Clone)]
pub struct DavResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl DavResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// HTTP client abstraction.
///
/// Implementations return `Err` only when no response was received
/// (connection refused, timeout, TLS failure). Every HTTP status is an
/// `Ok` response.
#[async_trait]
pub trait DavClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: DavRequest) -> Result<DavResponse, String>;
}

/// Maps a non-accepted status to an error.
fn status_error(response: &DavResponse) -> SyncError {
    match response.status {
        401 => SyncError::Unauthorized,
        403 => SyncError::Forbidden,
        404 => SyncError::status(404, "remote path not found"),
        code => SyncError::status(code, response.body_text()),
    }
}

/// Returns the parent collection URL, or `None` at the server root.
fn parent_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let path_start = trimmed.find("://").map(|i| i + 3)?;
    let slash = trimmed[path_start..].find('/').map(|i| i + path_start)?;
    let last = trimmed.rfind('/')?;
    if last <= slash {
        None
    } else {
        Some(trimmed[..last].to_string())
    }
}

/// The four remote operations the engine needs, with WebDAV status handling.
pub struct DavTransport<C: DavClient> {
    client: Arc<C>,
    credentials: Option<Credentials>,
    base_url: Option<String>,
}

impl<C: DavClient> DavTransport<C> {
    /// Creates a transport for an endpoint.
    pub fn new(client: Arc<C>, endpoint: &EndpointConfig) -> Self {
        let username = endpoint.normalized_username();
        let credentials = (!username.is_empty()).then(|| Credentials {
            username: username.to_string(),
            password: endpoint.password.clone(),
        });
        Self {
            client,
            credentials,
            base_url: endpoint.base_url(),
        }
    }

    async fn send(
        &self,
        method: DavMethod,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> SyncResult<DavResponse> {
        let request = DavRequest {
            method,
            url: url.to_string(),
            body,
            credentials: self.credentials.clone(),
        };
        let response = self
            .client
            .send(request)
            .await
            .map_err(SyncError::network)?;
        debug!(method = method.as_str(), url, status = response.status, "webdav");
        Ok(response)
    }

    /// Checks liveness and credentials. Accepts 200, 204 and 207.
    pub async fn ping(&self, url: &str) -> SyncResult<()> {
        let response = self.send(DavMethod::Options, url, None).await?;
        match response.status {
            200 | 204 | 207 => Ok(()),
            s if (200..300).contains(&s) => Ok(()),
            _ => Err(status_error(&response)),
        }
    }

    /// Downloads a file. Returns `None` on 404.
    pub async fn get(&self, url: &str) -> SyncResult<Option<Vec<u8>>> {
        let response = self.send(DavMethod::Get, url, None).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => Ok(Some(response.body)),
            _ => Err(status_error(&response)),
        }
    }

    /// Uploads a file.
    ///
    /// On 404 or 409 the sync root is created and the upload retried once.
    pub async fn put(&self, url: &str, bytes: Vec<u8>) -> SyncResult<()> {
        let response = self.send(DavMethod::Put, url, Some(bytes.clone())).await?;
        if response.is_success() {
            return Ok(());
        }
        if matches!(response.status, 404 | 409) {
            if let Some(base) = &self.base_url {
                debug!(url, status = response.status, "parent missing, creating sync root");
                self.ensure_directory(base).await?;
                let retry = self.send(DavMethod::Put, url, Some(bytes)).await?;
                if retry.is_success() {
                    return Ok(());
                }
                return Err(status_error(&retry));
            }
        }
        Err(status_error(&response))
    }

    /// Creates a collection and any missing ancestors.
    ///
    /// Tolerates "already exists" (405). On 409 the parent is created first;
    /// reaching the server root that way is an error.
    pub fn ensure_directory<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let dir = format!("{}/", url.trim_end_matches('/'));
            let response = self.send(DavMethod::Mkcol, &dir, None).await?;
            match response.status {
                200 | 201 | 204 | 405 => Ok(()),
                409 => {
                    let parent = parent_url(&dir).ok_or_else(|| {
                        SyncError::status(409, "cannot create remote directory")
                    })?;
                    self.ensure_directory(&parent).await?;
                    let again = self.send(DavMethod::Mkcol, &dir, None).await?;
                    match again.status {
                        200 | 201 | 204 | 405 => Ok(()),
                        _ => Err(status_error(&again)),
                    }
                }
                s if (200..300).contains(&s) => Ok(()),
                _ => Err(status_error(&response)),
            }
        })
    }
}
