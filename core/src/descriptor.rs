//! Request descriptors and their builder.
//!
//! # Design
//! A `RequestBuilder` stages every setting and `build()` emits a frozen
//! `RequestDescriptor`. Nothing can mutate a descriptor once it has been
//! handed to a `RequestClient`, so a queued request is always executed
//! exactly as it was described.
//!
//! The URL is parsed once in the builder and the TLS decision is cached
//! alongside it. Trust policy and user-agent settings stay `Option` so the
//! client can fill in its own defaults only where the caller was silent.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use url::Url;
use uuid::Uuid;

use crate::error::RequestError;
use crate::form::Form;
use crate::http::{ContentType, HeaderList, HttpMethod};
use crate::tls::TrustPolicy;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Unique token identifying one descriptor inside a `RequestClient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    fn generate() -> Self {
        RequestId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Request payload. Text and binary payloads are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    None,
    Text(String),
    Binary(Vec<u8>),
}

impl Body {
    /// Bytes on the wire; text is measured as UTF-8, not in characters.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::None => &[],
            Body::Text(text) => text.as_bytes(),
            Body::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable configuration for one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: RequestId,
    method: HttpMethod,
    url: Url,
    tls: bool,
    headers: HeaderList,
    body: Body,
    content_type: Option<ContentType>,
    trust_policy: Option<TrustPolicy>,
    send_user_agent: Option<bool>,
    connect_timeout: Duration,
    read_timeout: Duration,
    read: bool,
    write: bool,
}

impl RequestDescriptor {
    pub fn builder(url: &str) -> Result<RequestBuilder, RequestError> {
        RequestBuilder::new(url)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the request goes over TLS, derived from the URL scheme.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    pub fn trust_policy(&self) -> Option<&TrustPolicy> {
        self.trust_policy.as_ref()
    }

    /// `None` when the caller did not choose; the client default applies.
    pub fn send_user_agent(&self) -> Option<bool> {
        self.send_user_agent
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn reads_response(&self) -> bool {
        self.read
    }

    pub fn writes_body(&self) -> bool {
        self.write
    }
}

/// Staging area for a `RequestDescriptor`.
///
/// A content type set with `with_content_type` is kept apart from the one
/// inferred from a text body, so a later body can re-infer without ever
/// overriding the caller's choice.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    staged: RequestDescriptor,
    explicit_content_type: Option<ContentType>,
}

impl RequestBuilder {
    /// Start a GET request to `url`. Fails if the URL does not parse, has no
    /// host, or uses a scheme other than `http`/`https`.
    pub fn new(url: &str) -> Result<Self, RequestError> {
        let (url, tls) = validate_url(url)?;
        Ok(Self {
            staged: RequestDescriptor {
                id: RequestId::generate(),
                method: HttpMethod::Get,
                url,
                tls,
                headers: HeaderList::new(),
                body: Body::None,
                content_type: None,
                trust_policy: None,
                send_user_agent: None,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                read_timeout: DEFAULT_READ_TIMEOUT,
                read: true,
                write: true,
            },
            explicit_content_type: None,
        })
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.staged.method = method;
        self
    }

    pub fn with_url(mut self, url: &str) -> Result<Self, RequestError> {
        let (url, tls) = validate_url(url)?;
        self.staged.url = url;
        self.staged.tls = tls;
        Ok(self)
    }

    /// Add a header, replacing any existing one with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.staged.headers.set(name, value);
        self
    }

    /// Attach a text body. Switches the method to POST and, unless a
    /// content type was set explicitly, probes the text for JSON.
    pub fn with_text_body(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.staged.content_type = self
            .explicit_content_type
            .or_else(|| Some(infer_content_type(&text)));
        self.staged.body = Body::Text(text);
        self.staged.method = HttpMethod::Post;
        self.staged.write = true;
        self
    }

    /// Attach a binary body. Switches the method to POST; no content type
    /// is inferred, and one inferred from an earlier text body is dropped.
    pub fn with_binary_body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.staged.content_type = self.explicit_content_type;
        self.staged.body = Body::Binary(bytes.into());
        self.staged.method = HttpMethod::Post;
        self.staged.write = true;
        self
    }

    /// Attach a url-encoded form as the body.
    pub fn with_form_data(self, form: &Form) -> Self {
        let mut builder = self.with_text_body(form.serialize());
        builder.staged.content_type = Some(ContentType::FormUrlEncoded);
        builder
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.explicit_content_type = Some(content_type);
        self.staged.content_type = Some(content_type);
        self
    }

    /// Set `Authorization: Basic <base64(credentials)>` from a
    /// `username:password` pair. Empty credentials are ignored.
    pub fn with_basic_auth(self, credentials: &str) -> Self {
        if credentials.is_empty() {
            return self;
        }
        let token = STANDARD.encode(credentials.as_bytes());
        self.with_header("Authorization", format!("Basic {token}"))
    }

    /// Set the `Authorization` header to `token` exactly as given, e.g.
    /// `"Bearer abc123"`. Empty tokens are ignored.
    pub fn with_bearer_auth(self, token: &str) -> Self {
        if token.is_empty() {
            return self;
        }
        self.with_header("Authorization", token)
    }

    pub fn with_trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.staged.trust_policy = Some(policy);
        self
    }

    /// Connect and read timeouts in milliseconds; both must be positive.
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Result<Self, RequestError> {
        if connect_ms == 0 || read_ms == 0 {
            return Err(RequestError::Validation(format!(
                "timeouts must be positive (connect={connect_ms}ms, read={read_ms}ms)"
            )));
        }
        self.staged.connect_timeout = Duration::from_millis(connect_ms);
        self.staged.read_timeout = Duration::from_millis(read_ms);
        Ok(self)
    }

    /// Whether to send a `User-Agent` header identifying the client.
    pub fn with_user_agent(mut self, enabled: bool) -> Self {
        self.staged.send_user_agent = Some(enabled);
        self
    }

    /// Whether the response body is read after the head arrives.
    pub fn with_read(mut self, read: bool) -> Self {
        self.staged.read = read;
        self
    }

    /// Whether the request body is transmitted.
    pub fn with_write(mut self, write: bool) -> Self {
        self.staged.write = write;
        self
    }

    pub fn build(self) -> RequestDescriptor {
        self.staged
    }
}

fn validate_url(raw: &str) -> Result<(Url, bool), RequestError> {
    let url = Url::parse(raw.trim())?;
    let tls = match url.scheme() {
        "https" => true,
        "http" => false,
        other => {
            return Err(RequestError::Validation(format!(
                "unsupported scheme `{other}` in {raw}"
            )))
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RequestError::Validation(format!("missing host in {raw}")));
    }
    Ok((url, tls))
}

/// Anything that parses as a JSON document, scalars included, is sent as
/// JSON; everything else as plain text.
fn infer_content_type(text: &str) -> ContentType {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(_) => ContentType::Json,
        Err(_) => ContentType::PlainText,
    }
}
