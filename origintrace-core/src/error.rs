//! Error types for the origintrace core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the operation log, dispatch, DOM mutation, origin resolution and
//! configuration domains.

use std::path::PathBuf;

use crate::dom::NodeId;
use crate::oplog::{OperationKind, TrackingRef};

/// Top-level error type for the origintrace core library.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Operation log error: {0}")]
    Log(#[from] LogError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the append-only operation log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Unknown log entry: {index}")]
    UnknownEntry { index: TrackingRef },

    #[error("Entry {entry} references input {input} which is not older than it")]
    ForwardReference {
        entry: TrackingRef,
        input: TrackingRef,
    },

    #[error("Entry {entry} has no input at position {position}")]
    MissingInput { entry: TrackingRef, position: usize },

    #[error("Log indices are not dense: expected {expected}, found {found}")]
    NonDenseIndex { expected: usize, found: usize },

    #[error("Malformed log line {line}: {message}")]
    MalformedLine { line: usize, message: String },
}

/// Errors from the operation dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No dispatch handler for operation '{kind}'")]
    NotDispatchable { kind: OperationKind },

    #[error("Operation '{kind}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        kind: OperationKind,
        expected: usize,
        found: usize,
    },

    #[error("TypeError: {message}")]
    TypeError { message: String },
}

/// Errors from the DOM mutation layer.
#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("Unknown node: {node}")]
    UnknownNode { node: NodeId },

    #[error("Node {node} is not an element")]
    NotAnElement { node: NodeId },

    #[error("Node {node} has no parent")]
    NoParent { node: NodeId },

    #[error("Invalid insertAdjacentHTML position: {position}")]
    InvalidPosition { position: String },
}

/// Errors from the HTML origin resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Character offset {offset} is outside the rendered text of length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("No origin annotation governs node {node}")]
    NoAnnotation { node: NodeId },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `TraceError`.
pub type Result<T> = std::result::Result<T, TraceError>;
