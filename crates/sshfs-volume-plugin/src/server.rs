//! HTTP server for the plugin protocol.
//!
//! Serves HTTP/1.1 on a Unix socket. Every request is handed to
//! [`protocol::dispatch`] on the blocking pool, since registry operations
//! wait on `sshfs`.

use std::convert::Infallible;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sshfs_volume::VolumeRegistry;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::protocol;

/// A running plugin server.
pub struct PluginServer {
    socket_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PluginServer {
    /// Bind `socket_path` and start serving `registry`.
    ///
    /// A stale socket file left by a previous run is replaced.
    pub async fn start(registry: Arc<VolumeRegistry>, socket_path: &Path) -> io::Result<Self> {
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(socket_path) {
            Ok(()) => debug!(socket = %socket_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(socket = %socket_path.display(), "Starting plugin server");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = run_server(listener, registry) => {
                    debug!("Server loop ended");
                }
                _ = shutdown_rx => {
                    info!("Received shutdown signal");
                }
            }
        });

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting connections and remove the socket file.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        self.remove_socket();
        info!("Plugin server stopped");
    }

    fn stop_sync(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
            self.remove_socket();
        }
    }

    fn remove_socket(&self) {
        if let Err(e) = fs::remove_file(&self.socket_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(socket = %self.socket_path.display(), error = %e, "Failed to remove socket");
        }
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

async fn run_server(listener: UnixListener, registry: Arc<VolumeRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let registry = Arc::clone(&registry);
                        async move { Ok::<_, Infallible>(handle(registry, req).await) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await
                        && !e.is_incomplete_message()
                    {
                        warn!(error = %e, "HTTP connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn handle(registry: Arc<VolumeRegistry>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if req.method() != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "Err": format!("method {} not allowed", req.method()) }),
        );
    }

    let endpoint = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "Err": format!("failed to read request body: {e}") }),
            );
        }
    };

    let result =
        tokio::task::spawn_blocking(move || protocol::dispatch(&registry, &endpoint, &body)).await;

    match result {
        Ok(Ok(value)) => json_response(StatusCode::OK, &value),
        Ok(Err(e)) => json_response(e.status(), &e.body()),
        Err(e) => {
            error!(error = %e, "Request handler panicked");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "Err": "internal error" }),
            )
        }
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(protocol::CONTENT_TYPE),
    );
    response
}
