use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

use crate::error::ListingError;
use crate::listing::RemoteApi;

/// OAuth consumer key and secret of a Bitbucket account
#[derive(Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    /// Build credentials from whatever the CLI, environment or config provided
    pub fn resolve(key: Option<String>, secret: Option<String>) -> Result<Self> {
        let key = key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing Bitbucket API key. Pass --key or set BITBUCKET_KEY"))?;
        let secret = secret.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            anyhow!("Missing Bitbucket API secret. Pass --secret or set BITBUCKET_SECRET")
        })?;

        Ok(Self { key, secret })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Bitbucket API client holding an OAuth access token
pub struct BitbucketClient {
    http: reqwest::Client,
    access_token: String,
}

impl fmt::Debug for BitbucketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitbucketClient")
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl BitbucketClient {
    /// Exchange the consumer key/secret for an access token (client credentials grant)
    pub async fn authenticate(token_url: &str, credentials: &Credentials) -> Result<Self, ListingError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let transport = |source| ListingError::Transport {
            url: token_url.to_string(),
            source,
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("bitbucket-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        debug!("Requesting access token from {}", token_url);

        let response = http
            .post(token_url)
            .basic_auth(&credentials.key, Some(&credentials.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Authentication {
                url: token_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|source| ListingError::Decode {
                url: token_url.to_string(),
                source,
            })?;

        info!("Obtained Bitbucket access token");

        Ok(Self {
            http,
            access_token: token.access_token,
        })
    }
}

#[async_trait]
impl RemoteApi for BitbucketClient {
    async fn get_json(&self, url: &str) -> Result<Value, ListingError> {
        let transport = |source| ListingError::Transport {
            url: url.to_string(),
            source,
        };

        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| ListingError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
