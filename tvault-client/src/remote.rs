//! HTTP transport for a TensorVault server.
//!
//! Talks to the `/data` and `/meta` endpoints with a blocking reqwest client:
//! - JSON existence checks, tree and commit calls
//! - Streaming upload bodies built from the upload frame sequence
//! - Download bodies consumed block by block as a frame source

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tvault_core::wire::{BlockReader, UploadFrameEncoder};
use tvault_core::{
    CheckRequest, ClientConfig, CommitRequest, ContentAddress, DataTransport, ErrorBody,
    ExistenceCheck, FrameSource, HashResponse, Head, MetaTransport, Result, TransportError,
    TransportErrorKind, TreeRequest, UploadFrames, UploadResponse, VaultError,
};

/// Blocking HTTP transport, shared by every call of one client.
pub struct HttpTransport {
    base_url: String,
    http: Client,
}

impl HttpTransport {
    /// Create a transport targeting `base_url` (e.g. `http://server:8080`).
    ///
    /// `timeout` bounds each request from connect until its body is read.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(&config.server_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .map_err(|e| request_error(path, e))?;
        parse_json(path, checked(path, resp)?)
    }

    fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|e| request_error(path, e))?;
        parse_json(path, checked(path, resp)?)
    }
}

impl DataTransport for HttpTransport {
    fn check_existence(&self, digest: &str, size: u64) -> Result<ExistenceCheck> {
        self.post_json(
            "/data/check",
            &CheckRequest {
                sha256: digest.to_string(),
                size,
            },
        )
    }

    fn upload_stream(&self, frames: UploadFrames) -> Result<ContentAddress> {
        let path = "/data/upload";
        let failure = Arc::new(Mutex::new(None));
        let body = Body::new(RecordingReader {
            inner: UploadFrameEncoder::new(frames),
            failure: Arc::clone(&failure),
        });

        let sent = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send();

        // a local read failure aborts the body; report it rather than the
        // resulting request error
        if let Some((kind, message)) = failure.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(VaultError::Io(std::io::Error::new(kind, message)));
        }

        let resp = sent.map_err(|e| request_error(path, e))?;
        let stored: UploadResponse = parse_json(path, checked(path, resp)?)?;
        tracing::debug!("Server stored {} bytes as {}", stored.size, stored.address.short());
        Ok(stored.address)
    }

    fn download_stream(&self, address: &ContentAddress) -> Result<Box<dyn FrameSource>> {
        let path = format!("/data/download/{}", address);
        let resp = self
            .http
            .get(self.url(&path))
            .send()
            .map_err(|e| request_error(&path, e))?;
        let resp = checked(&path, resp)?;
        Ok(Box::new(BlockReader::new(resp)))
    }
}

impl MetaTransport for HttpTransport {
    fn get_head(&self, branch: &str) -> Result<Head> {
        self.get_json(&format!("/meta/head?branch={}", encode_component(branch)))
    }

    fn build_tree(&self, entries: &BTreeMap<String, ContentAddress>) -> Result<String> {
        let resp: HashResponse = self.post_json(
            "/meta/tree",
            &TreeRequest {
                entries: entries.clone(),
            },
        )?;
        Ok(resp.hash)
    }

    fn commit(&self, request: &CommitRequest) -> Result<String> {
        let resp: HashResponse = self.post_json("/meta/commit", request)?;
        Ok(resp.hash)
    }
}

/// Remembers the first read error of an upload body
struct RecordingReader<R> {
    inner: R,
    failure: Arc<Mutex<Option<(ErrorKind, String)>>>,
}

impl<R: Read> Read for RecordingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).inspect_err(|e| {
            if let Ok(mut slot) = self.failure.lock() {
                slot.get_or_insert_with(|| (e.kind(), e.to_string()));
            }
        })
    }
}

fn request_error(path: &str, err: reqwest::Error) -> VaultError {
    let message = format!("{} failed: {}", path, err);
    let err = if err.is_connect() || err.is_timeout() {
        TransportError::unavailable(message)
    } else {
        TransportError::new(TransportErrorKind::Other, message)
    };
    err.into()
}

fn checked(path: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(status_error(path, status, &body))
}

/// Map a non-success status to the transport error categories.
fn status_error(path: &str, status: StatusCode, body: &str) -> VaultError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = format!("{} failed ({}): {}", path, status, detail);
    let err = match status {
        StatusCode::UNPROCESSABLE_ENTITY => TransportError::data_loss(message),
        StatusCode::NOT_FOUND => TransportError::not_found(message),
        StatusCode::REQUEST_TIMEOUT => TransportError::unavailable(message),
        s if s.is_server_error() => TransportError::internal(message),
        _ => TransportError::new(TransportErrorKind::Other, message),
    };
    err.into()
}

fn parse_json<T: DeserializeOwned>(path: &str, resp: Response) -> Result<T> {
    resp.json()
        .map_err(|e| VaultError::Protocol(format!("failed to parse {} response: {}", path, e)))
}

/// Percent-encode a query component.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let t = HttpTransport::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.base_url(), "http://localhost:8080");
        assert_eq!(t.url("/data/check"), "http://localhost:8080/data/check");
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"error":"integrity check failed"}"#;
        let err = status_error("/data/upload", StatusCode::UNPROCESSABLE_ENTITY, body);
        match err {
            VaultError::Integrity(msg) => assert!(msg.contains("integrity check failed")),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            status_error("/x", StatusCode::NOT_FOUND, ""),
            VaultError::UnknownAddress(_)
        ));
        assert!(matches!(
            status_error("/x", StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            VaultError::Server(_)
        ));
        assert!(matches!(
            status_error("/x", StatusCode::REQUEST_TIMEOUT, ""),
            VaultError::Network(_)
        ));
        assert!(matches!(
            status_error("/x", StatusCode::BAD_REQUEST, "bad"),
            VaultError::Server(_)
        ));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("main"), "main");
        assert_eq!(encode_component("dev/exp 1"), "dev%2Fexp%201");
    }

    #[test]
    fn test_recording_reader_keeps_first_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::PermissionDenied, "denied"))
            }
        }

        let failure = Arc::new(Mutex::new(None));
        let mut reader = RecordingReader {
            inner: Broken,
            failure: Arc::clone(&failure),
        };
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.read(&mut buf).is_err());
        let recorded = failure.lock().unwrap().take().unwrap();
        assert_eq!(recorded.0, ErrorKind::PermissionDenied);
    }
}
