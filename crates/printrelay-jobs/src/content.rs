// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content resolution: turn a job's `content` field into printable bytes.
//
// URI content is downloaded over HTTP(S).  Auth precedence:
//   1. the job's own `auth_config` (Basic, Digest or Bearer)
//   2. the session's bearer token, for URLs on the platform instance
//   3. nothing
//
// Base64 content is decoded leniently: whitespace and a `data:...,` prefix
// are stripped, and missing `=` padding is restored.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use printrelay_core::error::{RelayError, Result};
use printrelay_core::session::Session;
use printrelay_core::types::{ContentType, PrintJob};

/// Download timeout.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP credentials for one download.
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    Basic { user: String, pass: String },
    Digest { user: String, pass: String },
    Bearer(String),
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { user, .. } => write!(f, "Basic({user})"),
            Self::Digest { user, .. } => write!(f, "Digest({user})"),
            Self::Bearer(_) => write!(f, "Bearer"),
        }
    }
}

impl HttpAuth {
    /// Parse a job's `auth_config`: `{type, user?, pass?, token?}`.
    ///
    /// Returns `None` when no usable explicit auth is configured.
    pub fn from_job_config(config: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let kind = text("type");
        if kind.is_empty() {
            return None;
        }
        match kind.to_ascii_lowercase().as_str() {
            "basicauth" | "basic" => Some(Self::Basic {
                user: text("user"),
                pass: text("pass"),
            }),
            "digestauth" | "digest" => Some(Self::Digest {
                user: text("user"),
                pass: text("pass"),
            }),
            "bearertoken" | "bearer" => {
                let token = text("token");
                if token.is_empty() {
                    warn!("bearer auth configured without a token, ignoring");
                    None
                } else {
                    Some(Self::Bearer(token))
                }
            }
            other => {
                warn!(auth_type = other, "unknown auth type, ignoring");
                None
            }
        }
    }
}

/// Resolves job content into bytes.
pub struct ContentResolver {
    client: Client,
    session: Option<Arc<Session>>,
}

impl ContentResolver {
    pub fn new(timeout: Duration, session: Option<Arc<Session>>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, session))
    }

    pub fn with_client(client: Client, session: Option<Arc<Session>>) -> Self {
        Self { client, session }
    }

    pub async fn resolve(&self, job: &PrintJob) -> Result<Vec<u8>> {
        match &job.content_type {
            ContentType::PdfUri | ContentType::RawUri => {
                let auth = self.auth_for(job);
                self.download(&job.content, &auth).await
            }
            ContentType::PdfBase64 | ContentType::RawBase64 => decode_base64(&job.content),
            ContentType::Unsupported(other) => Err(RelayError::UnsupportedContent(other.clone())),
        }
    }

    /// Pick credentials for a job's download.
    pub fn auth_for(&self, job: &PrintJob) -> HttpAuth {
        if let Some(auth) = HttpAuth::from_job_config(&job.auth_config) {
            return auth;
        }
        match &self.session {
            Some(session) if session.is_platform_url(&job.content) => {
                debug!("attaching platform bearer token");
                HttpAuth::Bearer(session.access_token())
            }
            _ => HttpAuth::None,
        }
    }

    pub async fn download(&self, url: &str, auth: &HttpAuth) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| RelayError::Content(format!("bad URL: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        info!(host = %host, auth = ?auth, "downloading content");

        let request = self.client.get(parsed.clone());
        let response = match auth {
            HttpAuth::None => send(request).await?,
            HttpAuth::Basic { user, pass } => send(request.basic_auth(user, Some(pass))).await?,
            HttpAuth::Bearer(token) => send(request.bearer_auth(token)).await?,
            HttpAuth::Digest { user, pass } => {
                let first = send(request).await?;
                if first.status() == StatusCode::UNAUTHORIZED {
                    let header = digest_header(&first, &parsed, user, pass)?;
                    send(self.client.get(parsed.clone()).header(AUTHORIZATION, header)).await?
                } else {
                    first
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Content(format!("GET {host} returned {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::Content(format!("reading body from {host}: {e}")))?;
        debug!(host = %host, bytes = body.len(), "content downloaded");
        Ok(body.to_vec())
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| RelayError::Content(format!("HTTP request failed: {e}")))
}

/// Answer a digest challenge from a 401 response.
fn digest_header(challenge: &Response, url: &Url, user: &str, pass: &str) -> Result<String> {
    let www = challenge
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Content("401 without a digest challenge".into()))?;
    let mut prompt = digest_auth::parse(www)
        .map_err(|e| RelayError::Content(format!("bad digest challenge: {e}")))?;
    let uri = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let context = digest_auth::AuthContext::new(user, pass, uri);
    let answer = prompt
        .respond(&context)
        .map_err(|e| RelayError::Content(format!("digest response: {e}")))?;
    Ok(answer.to_header_string())
}

/// Standard alphabet that accepts non-zero bits after the last full byte,
/// as most encoders in the wild do.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decode base64 content, tolerating a data-URI prefix, embedded whitespace
/// and stripped padding.
pub fn decode_base64(content: &str) -> Result<Vec<u8>> {
    let mut data = content.trim();
    if data.starts_with("data:")
        && let Some(comma) = data.find(',')
    {
        data = &data[comma + 1..];
    }
    let mut cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let rem = cleaned.len() % 4;
    if rem != 0 {
        cleaned.extend(std::iter::repeat_n('=', 4 - rem));
    }
    LENIENT
        .decode(cleaned.as_bytes())
        .map_err(|e| RelayError::Content(format!("invalid base64: {e}")))
}
