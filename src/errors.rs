use thiserror::Error;

use crate::auth::{AuthTokenPermission, AuthTokenType};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("invalid player name: {0:?}")]
    InvalidName(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("auth token of type {token_type} lacks permission {permission}")]
    PermissionDenied {
        permission: AuthTokenPermission,
        token_type: AuthTokenType,
    },
}
