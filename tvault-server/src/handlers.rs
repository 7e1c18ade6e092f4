//! HTTP endpoint handlers for the data and metadata services.
//!
//! Endpoints:
//!   POST /data/check              → `{sha256, size}` -> `{exists, address?}`
//!   POST /data/upload             → length-delimited upload frames -> `{address, size}`
//!   GET  /data/download/{address} → length-delimited raw blocks
//!   GET  /meta/head?branch=       → branch head
//!   POST /meta/tree               → `{entries}` -> `{hash}`
//!   POST /meta/commit             → commit request -> `{hash}`

use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tvault_core::wire::{UploadFrameDecoder, encode_block};
use tvault_core::{
    CheckRequest, CommitRequest, ContentStore, ErrorBody, HashResponse, TreeRequest,
    UploadResponse, VaultError,
};

const DOWNLOAD_PREFIX: &str = "/data/download/";

/// Branch used when `/meta/head` has no `branch` parameter
const DEFAULT_BRANCH: &str = "main";

// ─────────────────────────────────────────────────────
// Public dispatch
// ─────────────────────────────────────────────────────

/// Route a request with an already collected body.
pub async fn dispatch(
    method: &str,
    path: &str,
    query: &str,
    body: Bytes,
    store: &Arc<ContentStore>,
    frame_size: usize,
) -> Response<Full<Bytes>> {
    match (method, path) {
        ("POST", "/data/check") => handle_check(store, &body).await,
        ("POST", "/data/upload") => handle_upload(store, body).await,
        ("GET", p) if p.starts_with(DOWNLOAD_PREFIX) => {
            handle_download(store, &p[DOWNLOAD_PREFIX.len()..], frame_size).await
        }
        ("GET", "/meta/head") => handle_head(store, query),
        ("POST", "/meta/tree") => handle_tree(store, &body).await,
        ("POST", "/meta/commit") => handle_commit(store, &body).await,
        _ => json_error(404, &format!("Unknown endpoint: {} {}", method, path)),
    }
}

/// HTTP status for a store failure
pub fn status_for(err: &VaultError) -> u16 {
    match err {
        VaultError::Protocol(_) | VaultError::Config(_) => 400,
        VaultError::NotFound(_) | VaultError::UnknownAddress(_) => 404,
        VaultError::Integrity(_) => 422,
        _ => 500,
    }
}

// ─────────────────────────────────────────────────────
// POST /data/check
// ─────────────────────────────────────────────────────

async fn handle_check(store: &Arc<ContentStore>, body: &[u8]) -> Response<Full<Bytes>> {
    let req: CheckRequest = match parse_json(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    run_blocking(store, "check", move |store| store.check(&req.sha256, req.size)).await
}

// ─────────────────────────────────────────────────────
// POST /data/upload
// ─────────────────────────────────────────────────────

async fn handle_upload(store: &Arc<ContentStore>, body: Bytes) -> Response<Full<Bytes>> {
    run_blocking(store, "upload", move |store| {
        let (address, size) = store.ingest(UploadFrameDecoder::new(body.as_ref()))?;
        Ok(UploadResponse { address, size })
    })
    .await
}

// ─────────────────────────────────────────────────────
// GET /data/download/{address}
// ─────────────────────────────────────────────────────

async fn handle_download(
    store: &Arc<ContentStore>,
    prefix: &str,
    frame_size: usize,
) -> Response<Full<Bytes>> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return json_error(400, &format!("Invalid address: {:?}", prefix));
    }
    let store = store.clone();
    let prefix = prefix.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let address = store.expand(&prefix)?;
        let data = store.get(&address)?;
        Ok::<_, VaultError>(encode_blocks(&data, frame_size))
    })
    .await;

    match result {
        Ok(Ok(body)) => {
            let mut resp = Response::new(Full::new(body));
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            resp
        }
        Ok(Err(e)) => vault_error(&e),
        Err(e) => json_error(500, &format!("download task failed: {}", e)),
    }
}

/// Frame `data` as `[len][block]...`; empty content yields an empty body.
fn encode_blocks(data: &Bytes, frame_size: usize) -> Bytes {
    let frame_size = frame_size.max(1);
    let frames = data.len().div_ceil(frame_size);
    let mut out = BytesMut::with_capacity(data.len() + 4 * frames);
    for block in data.chunks(frame_size) {
        out.extend_from_slice(&encode_block(block));
    }
    out.freeze()
}

// ─────────────────────────────────────────────────────
// Metadata: /meta/head, /meta/tree, /meta/commit
// ─────────────────────────────────────────────────────

fn handle_head(store: &ContentStore, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let branch = params
        .get("branch")
        .map(String::as_str)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_BRANCH);
    json_ok(&store.head(branch))
}

async fn handle_tree(store: &Arc<ContentStore>, body: &[u8]) -> Response<Full<Bytes>> {
    let req: TreeRequest = match parse_json(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    run_blocking(store, "tree", move |store| {
        store.build_tree(&req.entries).map(|hash| HashResponse { hash })
    })
    .await
}

async fn handle_commit(store: &Arc<ContentStore>, body: &[u8]) -> Response<Full<Bytes>> {
    let req: CommitRequest = match parse_json(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.branch.is_empty() {
        return json_error(400, "branch must not be empty");
    }
    run_blocking(store, "commit", move |store| {
        store.commit(&req).map(|hash| HashResponse { hash })
    })
    .await
}

// ─────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────

/// Run a store call on the blocking pool; the store touches the filesystem.
async fn run_blocking<T, F>(store: &Arc<ContentStore>, what: &str, f: F) -> Response<Full<Bytes>>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&ContentStore) -> Result<T, VaultError> + Send + 'static,
{
    let store = store.clone();
    match tokio::task::spawn_blocking(move || f(&store)).await {
        Ok(Ok(value)) => json_ok(&value),
        Ok(Err(e)) => vault_error(&e),
        Err(e) => json_error(500, &format!("{} task failed: {}", what, e)),
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response<Full<Bytes>>> {
    serde_json::from_slice(body).map_err(|e| json_error(400, &format!("Invalid JSON: {}", e)))
}

/// Parse query string into key-value pairs.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(urldecode(k), urldecode(v));
        }
    }
    map
}

/// Minimal URL percent-decoding.
fn urldecode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'%' => {
                let hi = bytes.next().and_then(hex_val);
                let lo = bytes.next().and_then(hex_val);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            _ => out.push(b),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn vault_error(err: &VaultError) -> Response<Full<Bytes>> {
    let status = status_for(err);
    if status >= 500 {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::debug!("Request rejected ({}): {}", status, err);
    }
    json_error(status, &err.to_string())
}

fn json_ok<T: Serialize>(data: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(data) {
        Ok(body) => json_response(200, body),
        Err(e) => json_error(500, &format!("failed to encode response: {}", e)),
    }
}

/// JSON `{error}` response with the given status
pub fn json_error(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ErrorBody {
        error: message.to_string(),
    })
    .unwrap_or_default();
    json_response(status, body)
}

fn json_response(status: u16, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use tvault_core::wire::{BlockReader, encode_upload_frame};
    use tvault_core::{ContentAddress, ExistenceCheck, FrameSource, Head, UploadFrame, fingerprint_bytes};

    async fn body_bytes(resp: Response<Full<Bytes>>) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    fn upload_body(path: &str, digest: &str, chunks: &[&[u8]]) -> Bytes {
        let mut out = BytesMut::new();
        let meta = UploadFrame::Meta {
            path: path.to_string(),
            digest: digest.to_string(),
        };
        out.extend_from_slice(&encode_upload_frame(&meta).unwrap());
        for chunk in chunks {
            let frame = UploadFrame::Chunk {
                data: Bytes::copy_from_slice(chunk),
            };
            out.extend_from_slice(&encode_upload_frame(&frame).unwrap());
        }
        out.freeze()
    }

    fn check_body(digest: &str, size: u64) -> Bytes {
        Bytes::from(
            serde_json::to_vec(&CheckRequest {
                sha256: digest.to_string(),
                size,
            })
            .unwrap(),
        )
    }

    async fn upload(store: &Arc<ContentStore>, data: &[u8]) -> UploadResponse {
        let fp = fingerprint_bytes(data);
        let body = upload_body("w.bin", &fp.digest, &[data]);
        let resp = dispatch("POST", "/data/upload", "", body, store, 4).await;
        assert_eq!(resp.status(), 200);
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn test_check_then_upload_then_hit() {
        let store = Arc::new(ContentStore::in_memory());
        let data = b"model weights";
        let fp = fingerprint_bytes(data);

        let resp = dispatch("POST", "/data/check", "", check_body(&fp.digest, fp.size), &store, 4).await;
        assert_eq!(resp.status(), 200);
        let check: ExistenceCheck = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(!check.exists);

        let stored = upload(&store, data).await;
        assert_eq!(stored.size, data.len() as u64);

        let resp = dispatch("POST", "/data/check", "", check_body(&fp.digest, fp.size), &store, 4).await;
        let check: ExistenceCheck = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(check, ExistenceCheck::hit(stored.address));
    }

    #[tokio::test]
    async fn test_check_rejects_bad_digest() {
        let store = Arc::new(ContentStore::in_memory());
        let resp = dispatch("POST", "/data/check", "", check_body("xyz", 1), &store, 4).await;
        assert_eq!(resp.status(), 400);

        let resp = dispatch("POST", "/data/check", "", Bytes::from_static(b"{"), &store, 4).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_upload_digest_mismatch() {
        let store = Arc::new(ContentStore::in_memory());
        let claimed = fingerprint_bytes(b"original").digest;
        let body = upload_body("w.bin", &claimed, &[&b"tampered"[..]]);
        let resp = dispatch("POST", "/data/upload", "", body, &store, 4).await;
        assert_eq!(resp.status(), 422);
        let err: ErrorBody = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(err.error.contains("integrity"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_upload_requires_meta_first() {
        let store = Arc::new(ContentStore::in_memory());
        let frame = UploadFrame::Chunk {
            data: Bytes::from_static(b"data"),
        };
        let body = encode_upload_frame(&frame).unwrap();
        let resp = dispatch("POST", "/data/upload", "", body, &store, 4).await;
        assert_eq!(resp.status(), 400);

        let resp = dispatch("POST", "/data/upload", "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_upload_truncated_body() {
        let store = Arc::new(ContentStore::in_memory());
        let data: &[u8] = b"0123456789";
        let fp = fingerprint_bytes(data);
        let body = upload_body("w.bin", &fp.digest, &[data]);
        let truncated = body.slice(..body.len() - 3);
        let resp = dispatch("POST", "/data/upload", "", truncated, &store, 4).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_download_blocks_and_prefix() {
        let store = Arc::new(ContentStore::in_memory());
        let data = b"0123456789";
        let stored = upload(&store, data).await;

        let path = format!("/data/download/{}", &stored.address.as_str()[..12]);
        let resp = dispatch("GET", &path, "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 200);
        let body = body_bytes(resp).await;

        let mut reader = BlockReader::new(body.as_ref());
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_frame().unwrap() {
            blocks.push(block);
        }
        assert_eq!(blocks.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(blocks.concat(), data);
    }

    #[tokio::test]
    async fn test_download_unknown_and_invalid() {
        let store = Arc::new(ContentStore::in_memory());
        let resp = dispatch("GET", "/data/download/abcdef", "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 404);

        let resp = dispatch("GET", "/data/download/not-hex", "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_download_empty_content() {
        let store = Arc::new(ContentStore::in_memory());
        let stored = upload(&store, b"").await;
        let path = format!("/data/download/{}", stored.address);
        let resp = dispatch("GET", &path, "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 200);
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_tree_commit_head() {
        let store = Arc::new(ContentStore::in_memory());
        let stored = upload(&store, b"weights").await;

        let mut entries = BTreeMap::new();
        entries.insert("model/w.bin".to_string(), stored.address.clone());
        let body = Bytes::from(serde_json::to_vec(&TreeRequest { entries }).unwrap());
        let resp = dispatch("POST", "/meta/tree", "", body, &store, 4).await;
        assert_eq!(resp.status(), 200);
        let tree: HashResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();

        let commit = CommitRequest {
            tree_hash: tree.hash,
            message: "first".into(),
            branch: "dev/exp".into(),
            author: "tester".into(),
        };
        let body = Bytes::from(serde_json::to_vec(&commit).unwrap());
        let resp = dispatch("POST", "/meta/commit", "", body, &store, 4).await;
        assert_eq!(resp.status(), 200);
        let commit_hash: HashResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();

        let resp = dispatch("GET", "/meta/head", "branch=dev%2Fexp", Bytes::new(), &store, 4).await;
        let head: Head = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(head.exists);
        assert_eq!(head.hash, Some(commit_hash.hash));
        assert_eq!(head.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_on_disk_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(ContentStore::open(tmp.path()).unwrap());
        let stored = upload(&store, b"weights").await;

        let mut entries = BTreeMap::new();
        entries.insert("w.bin".to_string(), stored.address);
        let body = Bytes::from(serde_json::to_vec(&TreeRequest { entries }).unwrap());
        let resp = dispatch("POST", "/meta/tree", "", body, &store, 4).await;
        let tree: HashResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let commit = CommitRequest {
                    tree_hash: tree.hash.clone(),
                    message: format!("commit {}", i),
                    branch: "main".into(),
                    author: "tester".into(),
                };
                tokio::spawn(async move {
                    let body = Bytes::from(serde_json::to_vec(&commit).unwrap());
                    dispatch("POST", "/meta/commit", "", body, &store, 4).await.status()
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), 200);
        }

        let resp = dispatch("GET", "/meta/head", "", Bytes::new(), &store, 4).await;
        let head: Head = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(head.version, 16);
        assert_eq!(ContentStore::open(tmp.path()).unwrap().head("main").version, 16);
    }

    #[tokio::test]
    async fn test_tree_with_unknown_address() {
        let store = Arc::new(ContentStore::in_memory());
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), ContentAddress::from("00ff"));
        let body = Bytes::from(serde_json::to_vec(&TreeRequest { entries }).unwrap());
        let resp = dispatch("POST", "/meta/tree", "", body, &store, 4).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let store = Arc::new(ContentStore::in_memory());
        let resp = dispatch("DELETE", "/data/check", "", Bytes::new(), &store, 4).await;
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query("branch=main&x=1");
        assert_eq!(params.get("branch").unwrap(), "main");
        assert_eq!(params.get("x").unwrap(), "1");
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_urldecode() {
        assert_eq!(urldecode("dev%2Fexp"), "dev/exp");
        assert_eq!(urldecode("a+b"), "a b");
        assert_eq!(urldecode("100%"), "100%");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&VaultError::Protocol("x".into())), 400);
        assert_eq!(status_for(&VaultError::UnknownAddress("x".into())), 404);
        assert_eq!(status_for(&VaultError::Integrity("x".into())), 422);
        assert_eq!(status_for(&VaultError::Server("x".into())), 500);
    }
}
