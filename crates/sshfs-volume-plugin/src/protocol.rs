//! Docker volume plugin protocol.
//!
//! Each endpoint is an HTTP POST whose JSON body names a volume. Responses
//! carry an `Err` string, empty on success. Field names follow the Docker
//! plugin API (`Name`, `Opts`, `Mountpoint`, ...).
//!
//! [`dispatch`] is synchronous: registry operations block on the mount tool,
//! so the server runs it on the blocking pool.

use std::collections::BTreeMap;

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use sshfs_volume::{ErrorKind, VolumeError, VolumeInfo, VolumeRegistry};
use thiserror::Error;
use tracing::{debug, warn};

/// Content type of every request and response.
pub const CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Subsystem announced on activation.
pub const IMPLEMENTS: &str = "VolumeDriver";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("malformed request body: {0}")]
    BadRequest(#[from] serde_json::Error),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

impl ProtocolError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Volume(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent back for this error.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({ "Err": self.to_string() })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    #[serde(default)]
    opts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    name: String,
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: [&'static str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrResponse {
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointResponse {
    mountpoint: String,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    volume: VolumeView,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    volumes: Vec<VolumeView>,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    capabilities: CapabilitiesView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesView {
    scope: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeView {
    name: String,
    mountpoint: String,
    created_at: String,
    status: VolumeStatus,
}

#[derive(Debug, Serialize)]
struct VolumeStatus {
    remote_target: String,
    references: u32,
    needs_cleanup: bool,
}

impl From<VolumeInfo> for VolumeView {
    fn from(info: VolumeInfo) -> Self {
        Self {
            mountpoint: info.mount_point.display().to_string(),
            created_at: info.created_at.to_rfc3339(),
            status: VolumeStatus {
                remote_target: info.remote_target,
                references: info.references,
                needs_cleanup: info.needs_cleanup,
            },
            name: info.name,
        }
    }
}

fn ok() -> ErrResponse {
    ErrResponse { err: String::new() }
}

/// Handle one protocol request against `registry`.
pub fn dispatch(
    registry: &VolumeRegistry,
    endpoint: &str,
    body: &[u8],
) -> Result<serde_json::Value, ProtocolError> {
    debug!(endpoint, "Plugin request");
    let response = handle(registry, endpoint, body);
    if let Err(ProtocolError::Volume(e)) = &response {
        log_volume_error(endpoint, e);
    }
    response
}

fn handle(
    registry: &VolumeRegistry,
    endpoint: &str,
    body: &[u8],
) -> Result<serde_json::Value, ProtocolError> {
    match endpoint {
        "/Plugin.Activate" => to_value(&ActivateResponse {
            implements: [IMPLEMENTS],
        }),
        "/VolumeDriver.Create" => {
            let req: CreateRequest = parse(body)?;
            registry.create(&req.name, req.opts.unwrap_or_default())?;
            to_value(&ok())
        }
        "/VolumeDriver.Remove" => {
            let req: NameRequest = parse(body)?;
            registry.remove(&req.name)?;
            to_value(&ok())
        }
        "/VolumeDriver.Path" => {
            let req: NameRequest = parse(body)?;
            let path = registry.path(&req.name)?;
            to_value(&MountpointResponse {
                mountpoint: path.display().to_string(),
                err: String::new(),
            })
        }
        "/VolumeDriver.Mount" => {
            let req: MountRequest = parse(body)?;
            debug!(volume = %req.name, consumer = %req.id, "Mount requested");
            let path = registry.mount(&req.name)?;
            to_value(&MountpointResponse {
                mountpoint: path.display().to_string(),
                err: String::new(),
            })
        }
        "/VolumeDriver.Unmount" => {
            let req: MountRequest = parse(body)?;
            debug!(volume = %req.name, consumer = %req.id, "Unmount requested");
            registry.unmount(&req.name)?;
            to_value(&ok())
        }
        "/VolumeDriver.Get" => {
            let req: NameRequest = parse(body)?;
            let volume = registry.get(&req.name)?;
            to_value(&GetResponse {
                volume: volume.into(),
                err: String::new(),
            })
        }
        "/VolumeDriver.List" => to_value(&ListResponse {
            volumes: registry.list().into_iter().map(VolumeView::from).collect(),
            err: String::new(),
        }),
        "/VolumeDriver.Capabilities" => to_value(&CapabilitiesResponse {
            capabilities: CapabilitiesView {
                scope: registry.capabilities().scope.as_str(),
            },
        }),
        other => Err(ProtocolError::UnknownEndpoint(other.to_string())),
    }
}

fn parse<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

fn to_value<T: Serialize>(response: &T) -> Result<serde_json::Value, ProtocolError> {
    Ok(serde_json::to_value(response)?)
}

fn log_volume_error(endpoint: &str, error: &VolumeError) {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::InvalidArgument => {
            debug!(endpoint, error = %error, "Request rejected");
        }
        ErrorKind::Tool | ErrorKind::Io | ErrorKind::State => {
            warn!(endpoint, error = %error, "Request failed");
        }
    }
}
