//! The typed error model every HostKit operation returns instead of an
//! untyped exception: a stable `code`, a human `message`, and an optional
//! `suggestion` the CLI can print as a follow-up hint.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, enumerated error codes. These are part of HostKit's external
/// contract (the `--json` CLI output and any embedder's match arms), so
/// variants are added, never renamed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Gate errors — checked before an operation is allowed to start.
    ProjectNotFound,
    ProjectPaused,
    ProjectExists,
    InvalidProjectName,
    PortExhausted,

    // Release / rollback errors.
    ReleaseNotFound,
    ReleasePathMissing,
    AlreadyCurrent,
    NoPreviousRelease,
    ActivateFailed,

    // Deploy errors.
    DeployFailed,
    SourceNotFound,
    InvalidGitUrl,
    BuildFailed,
    InstallFailed,
    RateLimited,

    // Checkpoint errors.
    CheckpointFailed,
    CheckpointNotFound,
    CheckpointMismatch,
    BackupFileMissing,
    RestoreFailed,
    CommandNotFound,

    // Supervisor errors.
    ServiceNotFound,
    ServiceStartFailed,
    SystemdError,
    InvalidCronExpression,

    // Config errors.
    InvalidDuration,
    InvalidSize,
    InvalidKey,
    InvalidSnapshot,

    // Infrastructure errors.
    DnsResolutionFailed,
    DnsMismatch,
    RateLimitExceeded,
    CooldownActive,

    // Resource limit / sudoers / deprovisioning errors.
    InvalidResourceLimits,
    SudoersValidationFailed,
    DeprovisionFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ProjectNotFound => "PROJECT_NOT_FOUND",
            ErrorCode::ProjectPaused => "PROJECT_PAUSED",
            ErrorCode::ProjectExists => "PROJECT_EXISTS",
            ErrorCode::InvalidProjectName => "INVALID_PROJECT_NAME",
            ErrorCode::PortExhausted => "PORT_EXHAUSTED",
            ErrorCode::ReleaseNotFound => "RELEASE_NOT_FOUND",
            ErrorCode::ReleasePathMissing => "RELEASE_PATH_MISSING",
            ErrorCode::AlreadyCurrent => "ALREADY_CURRENT",
            ErrorCode::NoPreviousRelease => "NO_PREVIOUS_RELEASE",
            ErrorCode::ActivateFailed => "ACTIVATE_FAILED",
            ErrorCode::DeployFailed => "DEPLOY_FAILED",
            ErrorCode::SourceNotFound => "SOURCE_NOT_FOUND",
            ErrorCode::InvalidGitUrl => "INVALID_GIT_URL",
            ErrorCode::BuildFailed => "BUILD_FAILED",
            ErrorCode::InstallFailed => "INSTALL_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CheckpointFailed => "CHECKPOINT_FAILED",
            ErrorCode::CheckpointNotFound => "CHECKPOINT_NOT_FOUND",
            ErrorCode::CheckpointMismatch => "CHECKPOINT_MISMATCH",
            ErrorCode::BackupFileMissing => "BACKUP_FILE_MISSING",
            ErrorCode::RestoreFailed => "RESTORE_FAILED",
            ErrorCode::CommandNotFound => "COMMAND_NOT_FOUND",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::ServiceStartFailed => "SERVICE_START_FAILED",
            ErrorCode::SystemdError => "SYSTEMD_ERROR",
            ErrorCode::InvalidCronExpression => "INVALID_CRON_EXPRESSION",
            ErrorCode::InvalidDuration => "INVALID_DURATION",
            ErrorCode::InvalidSize => "INVALID_SIZE",
            ErrorCode::InvalidKey => "INVALID_KEY",
            ErrorCode::InvalidSnapshot => "INVALID_SNAPSHOT",
            ErrorCode::DnsResolutionFailed => "DNS_RESOLUTION_FAILED",
            ErrorCode::DnsMismatch => "DNS_MISMATCH",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::CooldownActive => "COOLDOWN_ACTIVE",
            ErrorCode::InvalidResourceLimits => "INVALID_RESOURCE_LIMITS",
            ErrorCode::SudoersValidationFailed => "SUDOERS_VALIDATION_FAILED",
            ErrorCode::DeprovisionFailed => "DEPROVISION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type every HostKit operation returns: a typed code plus a
/// message, never a raw exception/panic. `suggestion` is populated for
/// errors where a next step exists (e.g. `NO_PREVIOUS_RELEASE` suggests
/// deploying first).
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HostKitError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl HostKitError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_render_screaming_snake_case() {
        assert_eq!(ErrorCode::ProjectNotFound.as_str(), "PROJECT_NOT_FOUND");
        assert_eq!(ErrorCode::CooldownActive.as_str(), "COOLDOWN_ACTIVE");
    }

    #[test]
    fn error_serializes_without_suggestion_field_when_absent() {
        let err = HostKitError::new(ErrorCode::ProjectNotFound, "no such project: foo");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("suggestion"));
    }

    #[test]
    fn error_includes_suggestion_when_set() {
        let err = HostKitError::new(ErrorCode::NoPreviousRelease, "nothing to roll back to")
            .with_suggestion("deploy a release first");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("deploy a release first"));
    }

    #[test]
    fn display_format_matches_code_colon_message() {
        let err = HostKitError::new(ErrorCode::PortExhausted, "no ports left in range");
        assert_eq!(err.to_string(), "PORT_EXHAUSTED: no ports left in range");
    }
}
