//! Active-session storage forwarded to a trusted peer process.
//!
//! Used from processes that have no direct access to the session database or
//! scratch directories. Every operation becomes one `RpcRequest`; the peer runs
//! it against its own backend with `serve_request` and answers with an
//! `RpcResponse`. This side adds no validation and never retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::StorageError;
use crate::storage::file_storage::suspended_data_size;
use crate::storage::storage_trait::ActiveSessionStorage;
use crate::storage::types::{PropertyMap, SessionUser};

/// RPC method name carried by every request.
pub const ACTIVE_SESSION_STORAGE_METHOD: &str = "active_session_storage";

/// Sends one request to the peer and waits for its answer.
pub type InvokeRpc =
    Arc<dyn Fn(&RpcRequest) -> Result<RpcResponse, StorageError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum StorageOperation {
    ReadProperties { names: Vec<String> },
    ReadAllProperties,
    WriteProperties { properties: PropertyMap },
    Destroy,
    ClearScratchPath,
    IsEmpty,
    IsValid,
    Validate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub session_id: String,
    pub user: SessionUser,
    pub scratch_path: PathBuf,
    #[serde(flatten)]
    pub operation: StorageOperation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RpcPayload {
    Properties(PropertyMap),
    Flag(bool),
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFailure {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFailure>,
}

impl RpcResponse {
    pub fn success(payload: RpcPayload) -> Self {
        Self {
            result: Some(payload),
            error: None,
        }
    }

    pub fn failure(err: &StorageError) -> Self {
        Self {
            result: None,
            error: Some(RpcFailure {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn into_payload(self, session_id: &str) -> Result<RpcPayload, StorageError> {
        if let Some(failure) = self.error {
            if failure.kind == "session_not_found" {
                return Err(StorageError::SessionNotFound {
                    session_id: session_id.to_string(),
                });
            }
            return Err(StorageError::Remote {
                kind: failure.kind,
                message: failure.message,
            });
        }
        self.result.ok_or_else(|| unexpected("response carried neither result nor error"))
    }
}

fn unexpected(message: &str) -> StorageError {
    StorageError::Remote {
        kind: "unexpected_response".into(),
        message: message.into(),
    }
}

/// Run the request's operation against a local backend and encode the outcome
/// for the wire. This is the peer-side half of `RpcStorage`; the caller opens
/// `storage` for the request's session and user.
pub fn serve_request(storage: &dyn ActiveSessionStorage, request: &RpcRequest) -> RpcResponse {
    let outcome = match &request.operation {
        StorageOperation::ReadProperties { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            storage.read_properties(&names).map(RpcPayload::Properties)
        }
        StorageOperation::ReadAllProperties => {
            storage.read_all_properties().map(RpcPayload::Properties)
        }
        StorageOperation::WriteProperties { properties } => {
            storage.write_properties(properties).map(|_| RpcPayload::Done)
        }
        StorageOperation::Destroy => storage.destroy().map(|_| RpcPayload::Done),
        StorageOperation::ClearScratchPath => storage.clear_scratch_path().map(|_| RpcPayload::Done),
        StorageOperation::IsEmpty => storage.is_empty().map(RpcPayload::Flag),
        StorageOperation::IsValid => storage.is_valid().map(RpcPayload::Flag),
        StorageOperation::Validate => storage.validate().map(RpcPayload::Flag),
    };
    match outcome {
        Ok(payload) => RpcResponse::success(payload),
        Err(e) => {
            debug!("Storage request for session {} failed: {}", request.session_id, e);
            RpcResponse::failure(&e)
        }
    }
}

/// Transparent proxy to a peer that owns a file or database backend.
///
/// A name the peer leaves out of a read reply comes back as an empty string,
/// exactly like a property that was never set; this side cannot tell the two
/// apart.
pub struct RpcStorage {
    user: SessionUser,
    session_id: String,
    scratch_path: PathBuf,
    invoke: InvokeRpc,
}

impl RpcStorage {
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        user: SessionUser,
        session_id: S,
        scratch_path: P,
        invoke: InvokeRpc,
    ) -> Self {
        Self {
            user,
            session_id: session_id.into(),
            scratch_path: scratch_path.as_ref().to_path_buf(),
            invoke,
        }
    }

    fn call(&self, operation: StorageOperation) -> Result<RpcPayload, StorageError> {
        let request = RpcRequest {
            method: ACTIVE_SESSION_STORAGE_METHOD.to_string(),
            session_id: self.session_id.clone(),
            user: self.user.clone(),
            scratch_path: self.scratch_path.clone(),
            operation,
        };
        let response = (self.invoke)(&request)?;
        response.into_payload(&self.session_id)
    }

    fn call_properties(&self, operation: StorageOperation) -> Result<PropertyMap, StorageError> {
        match self.call(operation)? {
            RpcPayload::Properties(values) => Ok(values),
            other => Err(unexpected(&format!("expected properties, got {:?}", other))),
        }
    }

    fn call_flag(&self, operation: StorageOperation) -> Result<bool, StorageError> {
        match self.call(operation)? {
            RpcPayload::Flag(value) => Ok(value),
            other => Err(unexpected(&format!("expected flag, got {:?}", other))),
        }
    }

    fn call_done(&self, operation: StorageOperation) -> Result<(), StorageError> {
        match self.call(operation)? {
            RpcPayload::Done => Ok(()),
            other => Err(unexpected(&format!("expected acknowledgement, got {:?}", other))),
        }
    }
}

impl ActiveSessionStorage for RpcStorage {
    fn read_property(&self, name: &str) -> Result<String, StorageError> {
        let mut values = self.call_properties(StorageOperation::ReadProperties {
            names: vec![name.to_string()],
        })?;
        Ok(values.remove(name).unwrap_or_default())
    }

    fn read_properties(&self, names: &[&str]) -> Result<PropertyMap, StorageError> {
        let mut values = self.call_properties(StorageOperation::ReadProperties {
            names: names.iter().map(|n| n.to_string()).collect(),
        })?;
        for name in names {
            values.entry(name.to_string()).or_default();
        }
        Ok(values)
    }

    fn read_all_properties(&self) -> Result<PropertyMap, StorageError> {
        self.call_properties(StorageOperation::ReadAllProperties)
    }

    fn write_properties(&self, properties: &PropertyMap) -> Result<(), StorageError> {
        self.call_done(StorageOperation::WriteProperties {
            properties: properties.clone(),
        })
    }

    fn destroy(&self) -> Result<(), StorageError> {
        self.call_done(StorageOperation::Destroy)
    }

    fn clear_scratch_path(&self) -> Result<(), StorageError> {
        self.call_done(StorageOperation::ClearScratchPath)
    }

    fn is_empty(&self) -> Result<bool, StorageError> {
        self.call_flag(StorageOperation::IsEmpty)
    }

    fn is_valid(&self) -> Result<bool, StorageError> {
        self.call_flag(StorageOperation::IsValid)
    }

    fn validate(&self) -> Result<bool, StorageError> {
        self.call_flag(StorageOperation::Validate)
    }

    fn compute_suspend_size(&self) -> u64 {
        suspended_data_size(&self.scratch_path)
    }
}
