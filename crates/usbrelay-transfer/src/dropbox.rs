//! Dropbox sink using the HTTP API with a long-lived refresh token.
//!
//! # Design
//! - Short-lived access tokens are obtained from the refresh token on first use and cached.
//! - A 401 from the upload endpoint drops the cached token and retries the upload once.
//! - Uploads always overwrite an existing remote file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use usbrelay_config::{DropboxSettings, SecretString};

use crate::error::{TransferError, TransferResult};
use crate::sink::Sink;

/// OAuth2 token endpoint.
pub const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
/// Single-request upload endpoint.
pub const UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const SINK_NAME: &str = "dropbox";

/// Uploads files to Dropbox.
pub struct DropboxSink {
    client: Client,
    app_key: String,
    app_secret: SecretString,
    refresh_token: SecretString,
    token_url: String,
    upload_url: String,
    access_token: Mutex<Option<SecretString>>,
}

impl std::fmt::Debug for DropboxSink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DropboxSink")
            .field("app_key", &self.app_key)
            .field("token_url", &self.token_url)
            .field("upload_url", &self.upload_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    mute: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    path_display: Option<String>,
}

impl DropboxSink {
    /// Build a sink from the configured Dropbox credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: &DropboxSettings) -> TransferResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| TransferError::Http {
                operation: "dropbox.build_client",
                source,
            })?;
        Ok(Self {
            client,
            app_key: settings.app_key.clone(),
            app_secret: settings.app_secret.clone(),
            refresh_token: settings.refresh_token.clone(),
            token_url: TOKEN_URL.to_string(),
            upload_url: UPLOAD_URL.to_string(),
            access_token: Mutex::new(None),
        })
    }

    /// Point the sink at alternative endpoints.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        token_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        self.token_url = token_url.into();
        self.upload_url = upload_url.into();
        self
    }

    async fn access_token(&self) -> TransferResult<SecretString> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.refresh_access_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_access_token(&self) {
        *self.access_token.lock().await = None;
    }

    async fn refresh_access_token(&self) -> TransferResult<SecretString> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.expose()),
                ("client_id", self.app_key.as_str()),
                ("client_secret", self.app_secret.expose()),
            ])
            .send()
            .await
            .map_err(|source| TransferError::Http {
                operation: "dropbox.refresh_token",
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(rejected("dropbox.refresh_token", status, response).await);
        }
        let token: TokenResponse = response.json().await.map_err(|source| TransferError::Http {
            operation: "dropbox.decode_token",
            source,
        })?;
        Ok(SecretString::new(token.access_token))
    }

    async fn send_upload(
        &self,
        token: &SecretString,
        api_arg: &str,
        body: Vec<u8>,
    ) -> TransferResult<reqwest::Response> {
        self.client
            .post(&self.upload_url)
            .bearer_auth(token.expose())
            .header("Dropbox-API-Arg", api_arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|source| TransferError::Http {
                operation: "dropbox.upload",
                source,
            })
    }
}

#[async_trait]
impl Sink for DropboxSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn upload(&self, local: &Path, remote: &str) -> TransferResult<()> {
        let body = tokio::fs::read(local)
            .await
            .map_err(|source| TransferError::Io {
                operation: "dropbox.read_file",
                path: local.to_path_buf(),
                source,
            })?;
        let api_arg = upload_api_arg(remote)?;
        info!(destination = remote, "STARTING Dropbox upload");

        let token = self.access_token().await?;
        let mut response = self.send_upload(&token, &api_arg, body.clone()).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_access_token().await;
            let token = self.access_token().await?;
            response = self.send_upload(&token, &api_arg, body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(rejected("dropbox.upload", status, response).await);
        }
        let uploaded: UploadResponse =
            response.json().await.map_err(|source| TransferError::Http {
                operation: "dropbox.decode_upload",
                source,
            })?;
        info!(
            path_display = uploaded.path_display.as_deref().unwrap_or(remote),
            "FINISHED Dropbox upload"
        );
        Ok(())
    }
}

async fn rejected(
    operation: &'static str,
    status: StatusCode,
    response: reqwest::Response,
) -> TransferError {
    let body = response.text().await.unwrap_or_default();
    TransferError::Status {
        operation,
        status: status.as_u16(),
        body,
    }
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so anything outside
/// it is written as a `\uXXXX` escape.
fn upload_api_arg(remote: &str) -> TransferResult<String> {
    let json = serde_json::to_string(&UploadArg {
        path: remote,
        mode: "overwrite",
        autorename: false,
        mute: false,
    })
    .map_err(|source| TransferError::Encode {
        operation: "dropbox.api_arg",
        source,
    })?;
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            let mut units = [0_u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(escaped)
}
