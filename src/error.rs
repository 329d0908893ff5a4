use serde::Serialize;

use crate::{
    config::{ConfigError, ProxyError},
    release::ReleaseError,
    supervisor::SupervisorError,
};

/// Any failure a command can surface to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Stable identifiers the UI branches on.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigParse,
    ConfigIo,
    DuplicateName,
    NotFound,
    InvalidProxy,
    AlreadyRunning,
    MissingBinary,
    MissingConfig,
    SpawnFailure,
    NetworkFailure,
    RateLimited,
    Timeout,
    HttpStatus,
    InvalidResponse,
    Cancelled,
    UnsupportedArchiveType,
    ExtractionFailure,
    InvalidVersion,
    AssetUnavailable,
    Io,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

fn config_code(error: &ConfigError) -> ErrorCode {
    match error {
        ConfigError::Parse { .. } | ConfigError::Encode(_) => ErrorCode::ConfigParse,
        ConfigError::Missing(_) | ConfigError::Blank(_) | ConfigError::Io { .. } => ErrorCode::ConfigIo,
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(error) => config_code(error),
            Self::Proxy(error) => match error {
                ProxyError::DuplicateName(_) => ErrorCode::DuplicateName,
                ProxyError::NotFound(_) => ErrorCode::NotFound,
                ProxyError::EmptyName | ProxyError::Encode(_) => ErrorCode::InvalidProxy,
                ProxyError::Io { .. } => ErrorCode::Io,
                ProxyError::Store(error) => config_code(error),
            },
            Self::Supervisor(error) => match error {
                SupervisorError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
                SupervisorError::MissingBinary(_) => ErrorCode::MissingBinary,
                SupervisorError::MissingConfig(_) => ErrorCode::MissingConfig,
                SupervisorError::SpawnFailure { .. } => ErrorCode::SpawnFailure,
            },
            Self::Release(error) => match error {
                ReleaseError::Network(_) => ErrorCode::NetworkFailure,
                ReleaseError::RateLimited { .. } => ErrorCode::RateLimited,
                ReleaseError::Timeout => ErrorCode::Timeout,
                ReleaseError::Http { .. } => ErrorCode::HttpStatus,
                ReleaseError::Decode(_) => ErrorCode::InvalidResponse,
                ReleaseError::Cancelled => ErrorCode::Cancelled,
                ReleaseError::UnsupportedArchiveType(_) => ErrorCode::UnsupportedArchiveType,
                ReleaseError::Extraction(_) => ErrorCode::ExtractionFailure,
                ReleaseError::InvalidVersion(_) => ErrorCode::InvalidVersion,
                ReleaseError::AssetUnavailable { .. } => ErrorCode::AssetUnavailable,
                ReleaseError::Io { .. } => ErrorCode::Io,
            },
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn test_codes_serialize_screaming_snake_case() {
        let response = Error::from(ProxyError::DuplicateName("web".into())).to_response();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "code": "DUPLICATE_NAME",
                "message": "a proxy named 'web' already exists",
            })
        );
    }

    #[test]
    fn test_codes_follow_the_source_error() {
        assert_eq!(
            Error::from(SupervisorError::MissingBinary(Role::Client)).code(),
            ErrorCode::MissingBinary
        );
        assert_eq!(
            Error::from(ReleaseError::RateLimited { reset_at: None }).code(),
            ErrorCode::RateLimited
        );
        assert_eq!(Error::from(ReleaseError::Cancelled).code(), ErrorCode::Cancelled);
        assert_eq!(
            serde_json::to_value(ErrorCode::UnsupportedArchiveType).unwrap(),
            "UNSUPPORTED_ARCHIVE_TYPE"
        );
    }
}
