//! TensorVault reference server
//!
//! Serves the data and metadata HTTP endpoints over a [`ContentStore`]:
//! - `POST /data/check`, `POST /data/upload`, `GET /data/download/{address}`
//! - `GET /meta/head`, `POST /meta/tree`, `POST /meta/commit`

pub mod handlers;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tvault_core::{ContentStore, DEFAULT_CHUNK_SIZE, VaultError};

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    Addr(String),

    #[error("Store error: {0}")]
    Store(#[from] VaultError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Store root; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Size of the blocks served on download
    pub download_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            data_dir: Some(PathBuf::from("./data/vault")),
            max_body_size: 512 * 1024 * 1024, // 512 MB
            download_frame_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        self.addr
            .parse()
            .map_err(|e| ServerError::Addr(format!("{}: {}", self.addr, e)))
    }
}

/// Request handler shared by every connection
pub struct VaultHandler {
    store: Arc<ContentStore>,
    config: ServerConfig,
}

impl VaultHandler {
    pub fn new(store: Arc<ContentStore>, config: ServerConfig) -> Self {
        Self { store, config }
    }

    /// Open the store named by `config.data_dir`
    pub fn open(config: ServerConfig) -> Result<Self, ServerError> {
        let store = match &config.data_dir {
            Some(dir) => ContentStore::open(dir)?,
            None => ContentStore::in_memory(),
        };
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle an incoming HTTP request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        tracing::debug!("Request: {} {}", method, req.uri());

        let body = match Limited::new(req.into_body(), self.config.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<http_body_util::LengthLimitError>() => {
                return handlers::json_error(
                    413,
                    &format!("request body exceeds {} bytes", self.config.max_body_size),
                );
            }
            Err(e) => return handlers::json_error(400, &format!("failed to read body: {}", e)),
        };

        let response = handlers::dispatch(
            &method,
            &path,
            &query,
            body,
            &self.store,
            self.config.download_frame_size,
        )
        .await;
        tracing::info!("{} {} -> {}", method, path, response.status());
        response
    }
}

/// Accept connections on `listener` until it fails.
pub async fn serve(listener: TcpListener, handler: Arc<VaultHandler>) -> Result<(), ServerError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        let io = TokioIo::new(stream);
        tracing::debug!("Connection from {}", peer);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving connection: {:?}", e);
            }
        });
    }
}
