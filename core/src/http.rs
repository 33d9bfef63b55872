//! HTTP vocabulary shared by the builder, the transport and the reader.
//!
//! # Design
//! Everything here is plain owned data. `ResponseRecord` is the only place
//! execution results land: status, headers, decoded body and TLS metadata
//! are filled in as the pipeline advances, and any fault is parked in
//! `failure` rather than returned, so a queue drain never stops early.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::RequestError;

/// HTTP method for a request. HEAD, PATCH and OPTIONS are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether a request body is transmitted for this method.
    pub fn sends_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request content types understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Json,
    Xml,
    OctetStream,
    Html,
    FormUrlEncoded,
    PlainText,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            // Historical value, kept for servers that match on it.
            ContentType::OctetStream => "octet/stream",
            ContentType::Html => "text/html",
            ContentType::FormUrlEncoded => "application/x-www-form-urlencoded",
            ContentType::PlainText => "text/plain",
        }
    }

    /// Map a header value back to a known content type. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Some(ContentType::Json),
            "application/xml" => Some(ContentType::Xml),
            "octet/stream" => Some(ContentType::OctetStream),
            "text/html" => Some(ContentType::Html),
            "application/x-www-form-urlencoded" => Some(ContentType::FormUrlEncoded),
            "text/plain" => Some(ContentType::PlainText),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header pairs with case-insensitive add-or-replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value of `name` in place, or append it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reject header fields that would not survive the trip onto the wire
/// intact. Names must be RFC 9110 tokens; values may not contain CR, LF or
/// NUL, which would otherwise split one header into several.
pub(crate) fn check_header(name: &str, value: &str) -> Result<(), RequestError> {
    let is_tchar = |b: u8| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b);
    if name.is_empty() || !name.bytes().all(is_tchar) {
        return Err(RequestError::Validation(format!("invalid header name {name:?}")));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0')) {
        return Err(RequestError::Validation(format!(
            "invalid characters in value of header {name}"
        )));
    }
    Ok(())
}

/// Response headers keyed by lower-cased name. Repeated headers keep every
/// value in arrival order.
pub type ResponseHeaders = BTreeMap<String, Vec<String>>;

/// Outcome of one execution attempt.
///
/// `status_code == 0` with a `failure` means the server was never reached.
/// A non-zero status with a `failure` means the response head arrived but
/// the body could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    pub status_code: u16,
    pub origin: String,
    pub headers: ResponseHeaders,
    pub content_type: Option<String>,
    pub cipher_suite: Option<String>,
    /// DER-encoded peer certificates, leaf first.
    pub certificate_chain: Option<Vec<Vec<u8>>>,
    pub body: String,
    pub failure: Option<RequestError>,
}

impl ResponseRecord {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Record for an attempt that faulted before a connection existed.
    pub fn failed(origin: impl Into<String>, failure: RequestError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(origin)
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.status_code != 0
    }

    /// First value of a response header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Deserialize the body as JSON. A failed attempt yields its recorded
    /// failure instead of a parse of whatever partial body it holds.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        serde_json::from_str(&self.body).map_err(|e| RequestError::Decode(e.to_string()))
    }

    /// Keep the earliest fault; later ones are usually consequences of it.
    pub(crate) fn record_failure(&mut self, failure: RequestError) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_strings_and_body_rules() {
        assert_eq!(HttpMethod::default(), HttpMethod::Get);
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert!(HttpMethod::Post.sends_body());
        assert!(HttpMethod::Put.sends_body());
        assert!(!HttpMethod::Get.sends_body());
        assert!(!HttpMethod::Delete.sends_body());
    }

    #[test]
    fn content_type_values_are_stable() {
        assert_eq!(ContentType::Json.as_str(), "application/json");
        assert_eq!(ContentType::Xml.as_str(), "application/xml");
        assert_eq!(ContentType::OctetStream.as_str(), "octet/stream");
        assert_eq!(ContentType::Html.as_str(), "text/html");
        assert_eq!(
            ContentType::FormUrlEncoded.as_str(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(ContentType::PlainText.as_str(), "text/plain");
    }

    #[test]
    fn content_type_parse_ignores_case_and_params() {
        assert_eq!(
            ContentType::parse("Application/JSON; charset=utf-8"),
            Some(ContentType::Json)
        );
        assert_eq!(ContentType::parse(" text/plain "), Some(ContentType::PlainText));
        assert_eq!(ContentType::parse("image/png"), None);
        assert_eq!(ContentType::parse(""), None);
    }

    #[test]
    fn header_list_replaces_case_insensitively() {
        let mut headers = HeaderList::new();
        headers.set("Accept", "*/*");
        headers.set("X-Trace", "1");
        headers.set("accept", "application/json");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("ACCEPT"), Some("application/json"));
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Accept", "X-Trace"]);
    }

    #[test]
    fn record_keeps_first_failure() {
        let mut record = ResponseRecord::new("http://localhost/");
        record.record_failure(RequestError::Transport("write".into()));
        record.record_failure(RequestError::Transport("read".into()));
        assert_eq!(record.failure, Some(RequestError::Transport("write".into())));
        assert!(!record.is_success());
    }

    #[test]
    fn header_fields_reject_line_breaks() {
        assert!(check_header("X-Trace", "abc 123").is_ok());
        assert!(check_header("Authorization", "Bearer a.b.c").is_ok());
        for (name, value) in [
            ("X-A", "1\r\nX-Injected: yes"),
            ("X-A", "1\nsplit"),
            ("X-A", "nul\0byte"),
            ("X-A\r\nX-B", "1"),
            ("Bad Name", "1"),
            ("X-A:", "1"),
            ("", "1"),
        ] {
            assert!(
                matches!(check_header(name, value), Err(RequestError::Validation(_))),
                "{name:?}: {value:?}"
            );
        }
    }

    #[test]
    fn json_body_deserializes() {
        let mut record = ResponseRecord::new("http://localhost/");
        record.status_code = 200;
        record.body = r#"{"message":"hello","items":[1,2,3]}"#.into();
        let value: serde_json::Value = record.json().unwrap();
        assert_eq!(value["message"], "hello");
        let items: Vec<u32> = serde_json::from_value(value["items"].clone()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        record.body = "not json".into();
        assert!(matches!(
            record.json::<serde_json::Value>(),
            Err(RequestError::Decode(_))
        ));
    }

    #[test]
    fn json_of_failed_record_is_its_failure() {
        let record = ResponseRecord::failed(
            "http://localhost/",
            RequestError::Connect("refused".into()),
        );
        assert_eq!(
            record.json::<serde_json::Value>(),
            Err(RequestError::Connect("refused".into()))
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut record = ResponseRecord::new("http://localhost/");
        record
            .headers
            .insert("set-cookie".into(), vec!["a=1".into(), "b=2".into()]);
        assert_eq!(record.header("Set-Cookie"), Some("a=1"));
        assert_eq!(record.headers["set-cookie"].len(), 2);
    }
}
