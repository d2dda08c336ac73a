use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;

const EMPTY_ENGINE_MESSAGE: &str = "transformation engine failed without a message";

/// Failure reported by a transformation engine. Only the message crosses the
/// engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let trimmed = message.trim();
        Self {
            message: if trimmed.is_empty() {
                EMPTY_ENGINE_MESSAGE.to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Requests refused before anything is dispatched. These never touch session
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no image loaded")]
    NoSourceImage,
    #[error("instruction is empty")]
    EmptyInstruction,
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("a request is already in flight")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ImageLoad,
    Transformation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageLoad => "image_load",
            Self::Transformation => "transformation",
        }
    }
}

/// Content of the session's single error slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn image_load(err: &CodecError) -> Self {
        Self {
            kind: ErrorKind::ImageLoad,
            message: err.to_string(),
        }
    }

    pub fn transformation(err: &EngineError) -> Self {
        Self {
            kind: ErrorKind::Transformation,
            message: err.message().to_string(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::ImageLoad => write!(f, "Image load failed: {}", self.message),
            ErrorKind::Transformation => write!(f, "Transformation failed: {}", self.message),
        }
    }
}
