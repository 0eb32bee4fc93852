//! Cloud error classification and the handler's error type.

use std::fmt::Display;

use aws_sdk_s3::error::ProvideErrorMetadata;
use etl_stack_core::environment::ValidationError;
use thiserror::Error;

/// How a failed cloud call should be treated by the lifecycle handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// Safe to skip during teardown.
    NotFound,
    /// Safe to adopt during create.
    AlreadyExists,
    Throttled,
    /// Another operation holds the resource; retried with backoff.
    Conflict,
    /// Still referenced by something outside this stack. Retrying does not
    /// help.
    InUse,
    /// A freshly attached role is not yet usable by the calling service.
    IamPropagation,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub operation: String,
    pub code: Option<String>,
    pub message: String,
}

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "TableNotFoundException",
    "NoSuchEntity",
    "NoSuchBucket",
    "NoSuchKey",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceInUseException",
    "ResourceAlreadyExistsException",
    "EntityAlreadyExists",
    "TableAlreadyExistsException",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
];

const CONFLICT_CODES: &[&str] = &[
    "ConflictException",
    "DependencyViolation",
    "ConcurrentModification",
    "ConcurrentModificationException",
    "ContinuousBackupsUnavailableException",
];

const IN_USE_CODES: &[&str] = &["DeleteConflict"];

pub fn classify_code(code: Option<&str>, message: &str) -> CloudErrorKind {
    match code {
        Some(code) if NOT_FOUND_CODES.contains(&code) => CloudErrorKind::NotFound,
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => CloudErrorKind::AlreadyExists,
        Some(code) if THROTTLING_CODES.contains(&code) => CloudErrorKind::Throttled,
        Some(code) if CONFLICT_CODES.contains(&code) => CloudErrorKind::Conflict,
        Some(code) if IN_USE_CODES.contains(&code) => CloudErrorKind::InUse,
        Some("ValidationException" | "AccessDeniedException")
            if message.contains("assume") || message.contains("AssumeRole") =>
        {
            CloudErrorKind::IamPropagation
        }
        _ => CloudErrorKind::Other,
    }
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, operation, message)
    }

    /// Classifies an SDK error through its service error code rather than
    /// its debug text.
    pub fn from_sdk<E>(operation: &str, error: &E) -> Self
    where
        E: ProvideErrorMetadata + Display,
    {
        let code = error.code().map(str::to_string);
        let message = error
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        Self {
            kind: classify_code(code.as_deref(), &message),
            operation: operation.to_string(),
            code,
            message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }

    pub fn is_in_use(&self) -> bool {
        self.kind == CloudErrorKind::InUse
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == CloudErrorKind::AlreadyExists
    }

    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::Throttled | CloudErrorKind::Conflict | CloudErrorKind::IamPropagation
        )
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid handler environment: {0}")]
    Environment(#[from] ValidationError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("invalid bundled table data: {0}")]
    Seed(String),
}
