//! `reqwest`-backed WebDAV client.

use crate::config::SyncConfig;
use crate::transport::{DavClient, DavMethod, DavRequest, DavResponse};
use async_trait::async_trait;
use reqwest::{header, Client, Method};

/// A [`DavClient`] that talks to a real server over HTTP(S).
#[derive(Debug, Clone)]
pub struct ReqwestDavClient {
    client: Client,
}

impl ReqwestDavClient {
    /// Builds a client with the configured timeout and user agent.
    pub fn new(config: &SyncConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    fn method(method: DavMethod) -> Method {
        match method {
            DavMethod::Options => Method::OPTIONS,
            DavMethod::Get => Method::GET,
            DavMethod::Put => Method::PUT,
            // Extension methods are valid tokens; this cannot fail.
            DavMethod::Mkcol => Method::from_bytes(b"MKCOL").unwrap_or(Method::PUT),
        }
    }
}

#[async_trait]
impl DavClient for ReqwestDavClient {
    async fn send(&self, request: DavRequest) -> Result<DavResponse, String> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);

        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        builder = match request.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(body),
            None => builder.header(header::CONTENT_LENGTH, "0"),
        };

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(DavResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkcol_is_an_extension_method() {
        assert_eq!(ReqwestDavClient::method(DavMethod::Mkcol).as_str(), "MKCOL");
        assert_eq!(ReqwestDavClient::method(DavMethod::Options), Method::OPTIONS);
    }

    #[test]
    fn builds_from_config() {
        let config = SyncConfig::new("d");
        assert!(ReqwestDavClient::new(&config).is_ok());
    }
}
