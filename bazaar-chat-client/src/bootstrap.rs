//! REST bootstrap: the initial directory listing and message history that
//! seed the caches before live events take over.

use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::de::DeserializeOwned;
use shared::{
    config::ServerConfig,
    models::{ConversationSummary, ConversationsResponse, ErrorResponse, Message, MessagesResponse},
};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

const USER_AGENT: &str = concat!("bazaar-chat/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: ErrorResponse },

    #[error("server reported an unsuccessful {0} listing")]
    Unsuccessful(&'static str),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BootstrapApi: Send + Sync {
    /// `GET conversations`: the operator's directory listing.
    async fn conversations(&self) -> Result<Vec<ConversationSummary>, BootstrapError>;

    /// `GET messages`: the viewer's own message history.
    async fn messages(&self) -> Result<Vec<Message>, BootstrapError>;
}

#[derive(Debug, Clone)]
pub struct RestBootstrap {
    client: Client,
    base: Url,
}

impl RestBootstrap {
    /// # Errors
    /// Returns an error when the token is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(server: &ServerConfig) -> Result<Self, BootstrapError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &server.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| BootstrapError::InvalidToken)?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base: normalize_base(server.api_base_url.clone()),
        })
    }

    /// Absolute URL of `path` under the API base.
    ///
    /// # Errors
    /// Returns an error when `path` cannot be joined onto the base.
    pub fn endpoint(&self, path: &str) -> Result<Url, BootstrapError> {
        Ok(self.base.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BootstrapError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "bootstrap request");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BootstrapError::Status {
                status,
                body: ErrorResponse::from_body(&body),
            });
        }

        Ok(response.json().await?)
    }
}

/// `Url::join` drops the last segment unless the base ends with `/`.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait]
impl BootstrapApi for RestBootstrap {
    #[instrument(name = "chat.bootstrap.conversations", skip(self), err)]
    async fn conversations(&self) -> Result<Vec<ConversationSummary>, BootstrapError> {
        let response: ConversationsResponse = self.get_json("conversations").await?;
        if !response.success {
            return Err(BootstrapError::Unsuccessful("conversations"));
        }
        Ok(response.conversations)
    }

    #[instrument(name = "chat.bootstrap.messages", skip(self), err)]
    async fn messages(&self) -> Result<Vec<Message>, BootstrapError> {
        let response: MessagesResponse = self.get_json("messages").await?;
        if !response.success {
            return Err(BootstrapError::Unsuccessful("messages"));
        }
        Ok(response.messages)
    }
}
