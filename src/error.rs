//! Error types for Toposync.
//!
//! All errors in Toposync are represented by the `ToposyncError` enum,
//! which provides specific variants for different error categories.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Toposync operations.
///
/// Each variant represents a specific category of error that can occur
/// while mutating the local topology, allocating ports, or persisting
/// changes to the remote store.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum ToposyncError {
    /// Engine-level errors (startup, shutdown, session management).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON payloads, queue records).
    #[error("{0}")]
    Convert(String),

    /// Diagram model errors (unknown entities, dangling endpoints).
    #[error("{0}")]
    Model(String),

    /// Handle id grammar violations.
    #[error("{0}")]
    Handle(String),

    /// Port allocation failures (every candidate side saturated).
    #[error("{0}")]
    Allocation(String),

    /// Mutation scheduling errors.
    #[error("{0}")]
    Schedule(String),

    /// Offline queue errors.
    #[error("{0}")]
    Queue(String),

    /// Queue persistence errors.
    #[error("{0}")]
    Store(String),

    /// Remote persistence errors, already classified by the caller.
    #[error("{0}")]
    Remote(String),

    /// Session-level errors (rejected gestures, torn-down sessions).
    #[error("{0}")]
    Session(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl From<ToposyncError> for String {
    fn from(val: ToposyncError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for ToposyncError {
    fn from(error: std::io::Error) -> Self {
        ToposyncError::IoError(error.to_string())
    }
}

impl From<ToposyncError> for std::io::Error {
    fn from(val: ToposyncError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for ToposyncError {
    fn from(_: FromUtf8Error) -> Self {
        ToposyncError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for ToposyncError {
    fn from(error: serde_json::Error) -> Self {
        ToposyncError::Convert(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for ToposyncError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        ToposyncError::Queue(error.to_string())
    }
}
