//! HTTP(S) client for the host-side bridge that fronts the IBM i ODBC driver.
//!
//! The bridge listens on the configured host/port and exposes JSON endpoints
//! under `/api/v1`. Credentials travel as basic auth; the ODBC driver name is
//! forwarded in `X-Odbc-Driver` so the bridge opens the same kind of
//! connection the operator configured.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ilib_core::{
    credentials::CredentialsRecord,
    remote::{
        object_name, MessageOutcome, RemoteConnector, RemoteHost, SaveFileOutcome,
        SaveFileRequest,
    },
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT},
    StatusCode,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::archive;

const DRIVER_HEADER: &str = "x-odbc-driver";

/// Client-side settings for reaching the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// `https` or `http`.
    pub scheme: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct BridgeConnector {
    settings: BridgeSettings,
    client: reqwest::Client,
}

impl BridgeConnector {
    pub fn new(settings: BridgeSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("building http client")?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl RemoteConnector for BridgeConnector {
    fn name(&self) -> &'static str {
        "bridge"
    }

    #[instrument(skip_all, fields(host = %credentials.host, port = credentials.port))]
    async fn connect(&self, credentials: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>> {
        let host = BridgeHost::new(self.client.clone(), &self.settings.scheme, credentials)?;
        host.client
            .get(host.url("health"))
            .headers(host.headers.clone())
            .send()
            .await
            .context("bridge handshake failed")?
            .error_for_status()
            .context("bridge rejected the credentials")?;
        debug!("bridge handshake succeeded");
        Ok(Arc::new(host))
    }
}

/// Authenticated session against one bridge endpoint.
pub struct BridgeHost {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl BridgeHost {
    fn new(client: reqwest::Client, scheme: &str, creds: &CredentialsRecord) -> Result<Self> {
        Ok(Self {
            client,
            base_url: base_url(scheme, &creds.host, creds.port),
            headers: auth_headers(creds)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn fetch_rows(&self, path: &str) -> Result<Vec<Value>> {
        let body: Value = self
            .client
            .get(self.url(path))
            .headers(self.headers.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        rows_from_body(body)
    }

    /// A single object; a 404 from the bridge means it does not exist.
    async fn fetch_one(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(path))
            .headers(self.headers.clone())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response.error_for_status()?.json().await?;
        single_row(body)
    }
}

#[async_trait]
impl RemoteHost for BridgeHost {
    #[instrument(skip_all)]
    async fn list_libraries(&self) -> Result<Vec<Value>> {
        self.fetch_rows("libraries").await
    }

    #[instrument(skip_all)]
    async fn list_users(&self) -> Result<Vec<Value>> {
        self.fetch_rows("users").await
    }

    #[instrument(skip_all, fields(library = %name))]
    async fn library_info(&self, name: &str) -> Result<Option<Value>> {
        self.fetch_one(&format!("libraries/{}", object_name(name)?))
            .await
    }

    #[instrument(skip_all, fields(user = %name))]
    async fn user_info(&self, name: &str) -> Result<Option<Value>> {
        self.fetch_one(&format!("users/{}", object_name(name)?)).await
    }

    #[instrument(skip_all, fields(library = %request.library))]
    async fn create_save_file(&self, request: &SaveFileRequest) -> Result<SaveFileOutcome> {
        let library = object_name(&request.library)?;
        let save_file = object_name(&request.save_file)?;
        let path = request.download_dir.join(format!("{save_file}.zip"));
        let body = json!({
            "library": library,
            "save_file": save_file,
            "description": request.description,
            "target_release": request.target_release,
            "authority": request.authority,
        });
        let data = self
            .client
            .post(self.url("savefiles"))
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let bytes = archive::store(path.clone(), data).await?;
        Ok(SaveFileOutcome { path, bytes })
    }

    #[instrument(skip_all, fields(user = %username))]
    async fn send_message(&self, username: &str, text: &str) -> Result<MessageOutcome> {
        let reply: MessageReply = self
            .client
            .post(self.url("messages"))
            .headers(self.headers.clone())
            .json(&json!({ "user": username, "text": text }))
            .send()
            .await?
            .json()
            .await?;
        Ok(reply.into_outcome())
    }
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    #[serde(default)]
    success: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl MessageReply {
    fn into_outcome(self) -> MessageOutcome {
        match (self.error, self.success) {
            (Some(err), _) => MessageOutcome::Rejected(err),
            (None, Some(_)) => MessageOutcome::Delivered,
            (None, None) => MessageOutcome::Rejected("bridge sent an empty reply".to_string()),
        }
    }
}

fn base_url(scheme: &str, host: &str, port: u16) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains(':') && !host.starts_with('[') {
        // bare IPv6 literal
        format!("{scheme}://[{host}]:{port}")
    } else {
        format!("{scheme}://{host}:{port}")
    }
}

fn auth_headers(creds: &CredentialsRecord) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("ilibrary"));
    let basic = BASE64.encode(format!("{}:{}", creds.username, creds.password));
    let mut auth = HeaderValue::from_str(&format!("Basic {basic}"))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
        HeaderName::from_static(DRIVER_HEADER),
        HeaderValue::from_str(&creds.driver)?,
    );
    Ok(headers)
}

/// Listings arrive either as a JSON array or as a string holding one.
fn rows_from_body(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::String(text) => match serde_json::from_str(&text)? {
            Value::Array(rows) => Ok(rows),
            other => bail!("expected a JSON array, got {}", kind(&other)),
        },
        Value::Null => Ok(Vec::new()),
        other => bail!("expected a JSON array, got {}", kind(&other)),
    }
}

/// Detail endpoints answer with an object, or with a one-row listing.
fn single_row(body: Value) -> Result<Option<Value>> {
    match body {
        Value::Object(_) => Ok(Some(body)),
        other => Ok(rows_from_body(other)?.into_iter().next()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
