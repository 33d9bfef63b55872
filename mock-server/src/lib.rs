use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const JSON_BODY: &str = r#"{"message":"hello","items":[1,2,3]}"#;
pub const GZIP_BODY: &str = r#"{"compressed":true,"text":"gzip payload"}"#;
pub const LINES_BODY: &str = "alpha\r\nbeta\ngamma\n";
pub const CHUNKS: [&str; 3] = ["first chunk|", "second chunk|", "last"];
pub const SLOW_DELAY: Duration = Duration::from_secs(2);

/// What the server saw for a request sent to `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Hit counter shared by every request to `/count`.
pub type Hits = Arc<AtomicU64>;

pub fn app() -> Router {
    let hits: Hits = Arc::new(AtomicU64::new(0));
    Router::new()
        .route("/json", get(json))
        .route("/gzip", get(gzip))
        .route("/chunked", get(chunked))
        .route("/lines", get(lines))
        .route("/cookies", get(cookies))
        .route("/echo", any(echo))
        .route("/status/{code}", get(status))
        .route("/count", get(count))
        .route("/slow", get(slow))
        .with_state(hits)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub fn gzip_bytes(text: &str) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    encoder.finish()
}

async fn json() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], JSON_BODY)
}

async fn gzip() -> Result<impl IntoResponse, StatusCode> {
    let bytes = gzip_bytes(GZIP_BODY).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_ENCODING, "gzip"),
        ],
        bytes,
    ))
}

/// Streamed without a length, so hyper frames it as chunked.
async fn chunked() -> impl IntoResponse {
    let stream = futures::stream::iter(CHUNKS.map(Ok::<_, std::io::Error>));
    ([(header::CONTENT_TYPE, "text/plain")], Body::from_stream(stream))
}

async fn lines() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], LINES_BODY)
}

async fn cookies() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
    headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
    (headers, "cookies set")
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn status(Path(code): Path<u16>) -> Result<impl IntoResponse, StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn count(State(hits): State<Hits>) -> String {
    (hits.fetch_add(1, Ordering::SeqCst) + 1).to_string()
}

async fn slow() -> &'static str {
    tokio::time::sleep(SLOW_DELAY).await;
    "finally"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_serializes_to_json() {
        let echo = Echo {
            method: "POST".to_string(),
            headers: BTreeMap::from([("accept".to_string(), "*/*".to_string())]),
            body: "p1=v1".to_string(),
        };
        let json = serde_json::to_value(&echo).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["headers"]["accept"], "*/*");
        assert_eq!(json["body"], "p1=v1");
    }

    #[test]
    fn echo_roundtrips_through_json() {
        let echo = Echo {
            method: "PUT".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
        };
        let json = serde_json::to_string(&echo).unwrap();
        let back: Echo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, echo);
    }

    #[test]
    fn fixture_json_is_valid() {
        assert!(serde_json::from_str::<serde_json::Value>(JSON_BODY).is_ok());
        assert!(serde_json::from_str::<serde_json::Value>(GZIP_BODY).is_ok());
    }

    #[test]
    fn gzip_bytes_have_magic_header() {
        let bytes = gzip_bytes(GZIP_BODY).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }
}
