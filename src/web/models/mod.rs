use serde::{Deserialize, Serialize};

use crate::data::config_store::BackupKind;

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Returned by login; the old CSRF token dies with the anonymous session.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub csrf_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginStatusResponse {
    pub authenticated: bool,
    pub csrf_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetupResponse {
    /// Shown once; only its hash is kept.
    pub password: String,
}

/// Names a managed container, either by logical or engine name.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub id: String,
    pub logs: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupStartedResponse {
    pub operation: BackupKind,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
