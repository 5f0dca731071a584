//! HTTP side of the room contract.

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::AUTHORIZATION};
use roomlink_core::{HeaderSigner, NoteResponse, OpenRequest, ROOM_PATH_PREFIX, RoomCode};
use serde_json::Value;

use crate::error::ClientError;

/// `{base}/parties/main/{code}`.
pub fn party_url(base: &str, code: &RoomCode) -> String {
    format!("{}{ROOM_PATH_PREFIX}/{code}", base.trim_end_matches('/'))
}

/// WebSocket URL for a room: [`party_url`] with `http` swapped for `ws` and
/// `https` for `wss`.
///
/// # Errors
///
/// Returns `ClientError::InvalidUrl` for any other scheme.
pub fn socket_url(base: &str, code: &RoomCode) -> Result<String, ClientError> {
    let url = party_url(base, code);
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url)
    } else {
        Err(ClientError::InvalidUrl {
            url: base.to_string(),
            reason: "expected an http(s) or ws(s) scheme".to_string(),
        })
    }
}

/// Options for the opening POST.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Extra request headers, normally the signed authorization header.
    pub headers: HeaderMap,
    /// Note published to the joiner.
    pub note: Option<Value>,
}

impl OpenOptions {
    /// No headers, no note.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `note` to the joiner.
    #[must_use]
    pub fn with_note(mut self, note: Value) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a request header.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidHeader` if the name or value is not
    /// valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidHeader { reason: e.to_string() })?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidHeader { reason: e.to_string() })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sign the next sequence number and set it as the `Authorization`
    /// header.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidHeader` if the rendered header is not
    /// valid HTTP.
    pub fn signed_by(self, signer: &mut HeaderSigner) -> Result<Self, ClientError> {
        let header = signer.next_header();
        self.with_header(AUTHORIZATION.as_str(), &header)
    }
}

/// Thin HTTP client for one roomlink deployment.
#[derive(Debug, Clone)]
pub struct RoomHttp {
    client: reqwest::Client,
    base: String,
}

impl RoomHttp {
    /// Client for rooms under `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    /// Reuse an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self { client, base: base.into() }
    }

    /// Deployment base URL.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Room URL for `code`.
    pub fn url(&self, code: &RoomCode) -> String {
        party_url(&self.base, code)
    }

    /// `HEAD` the room and report the raw status.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` if the request cannot be completed.
    pub async fn head(&self, code: &RoomCode) -> Result<StatusCode, ClientError> {
        let response = self.client.head(self.url(code)).send().await?;
        Ok(response.status())
    }

    /// Fetch the initiator's note.
    ///
    /// # Errors
    ///
    /// - `ClientError::RoomNotOpen` on 409, while the room is not open yet
    /// - `ClientError::Status` for any other non-2xx
    /// - `ClientError::Request` if the body is not a note response
    pub async fn fetch_note(&self, code: &RoomCode) -> Result<Value, ClientError> {
        let response = self.client.get(self.url(code)).send().await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(ClientError::RoomNotOpen { code: code.clone() });
        }
        let response = ensure_success(response).await?;
        let body: NoteResponse = response.json().await?;
        Ok(body.note)
    }

    /// Send the opening POST.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Status` for any non-2xx. There is no retry.
    pub async fn open(&self, code: &RoomCode, options: &OpenOptions) -> Result<(), ClientError> {
        let body = OpenRequest { note: options.note.clone() };
        let response = self
            .client
            .post(self.url(code))
            .headers(options.headers.clone())
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        RoomCode::parse("123456").unwrap()
    }

    #[test]
    fn party_url_joins_path() {
        assert_eq!(party_url("http://h:1999", &code()), "http://h:1999/parties/main/123456");
        assert_eq!(party_url("http://h:1999/", &code()), "http://h:1999/parties/main/123456");
    }

    #[test]
    fn socket_url_swaps_scheme() {
        assert_eq!(socket_url("http://h", &code()).unwrap(), "ws://h/parties/main/123456");
        assert_eq!(socket_url("https://h", &code()).unwrap(), "wss://h/parties/main/123456");
        assert_eq!(socket_url("wss://h", &code()).unwrap(), "wss://h/parties/main/123456");
        assert!(matches!(socket_url("ftp://h", &code()), Err(ClientError::InvalidUrl { .. })));
    }

    #[test]
    fn signed_options_carry_authorization() {
        let mut signer = HeaderSigner::from_secret_bytes(&[4; 32]);
        let options = OpenOptions::new().signed_by(&mut signer).unwrap();

        let header = options.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(header.starts_with("Signed "));
        assert_eq!(signer.sequence(), 1);
    }

    #[test]
    fn bad_header_is_rejected() {
        let result = OpenOptions::new().with_header("bad header", "x");
        assert!(matches!(result, Err(ClientError::InvalidHeader { .. })));
    }
}
