use std::fmt;

use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    UnknownTemporaryIdentifier,
    MalformedIdentifier,
    InvalidPayload,
    Conflict,
    GenerationFailed,
    Persistence,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn persistence(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Persistence,
            code: "persistence_failure",
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn unknown_temporary_id(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::UnknownTemporaryIdentifier,
            code: "unknown_temporary_identifier",
            public,
            source,
        }
    }

    pub fn malformed_id(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::MalformedIdentifier,
            code: "malformed_identifier",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidPayload,
            code: "invalid_payload",
            public,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidPayload,
            code,
            public,
            source,
        }
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "conflict",
            public,
            source,
        }
    }

    pub fn generation_failed(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::GenerationFailed,
            code: "generation_failed",
            public,
            source,
        }
    }
}

impl fmt::Display for LibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.public, self.source)
    }
}

impl std::error::Error for LibError {}

impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::persistence("Database request failed", anyhow!(value))
    }
}
