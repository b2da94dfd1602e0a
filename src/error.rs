//! Error types for getter.
//!
//! Session-level errors (`TransportError`, `FramingError`, `AuthenticationError`,
//! `ProtocolError`) end the connection they happen on and nothing else.
//! `ConfigError` is raised before any socket is opened.
//! None of these messages include token or key material.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::cryptography::EncryptionError;

/// Failures of the underlying TCP stream.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("read failed: {0}")]
    Read(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Violations of the `(u32 length, payload)` framing.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    Oversized { size: usize, max: usize },
}

/// The peer does not hold the same token, or the data was tampered with.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("encrypted blob is shorter than the nonce ({0} bytes)")]
    BlobTooShort(usize),

    #[error("decryption failed: wrong token or corrupted data")]
    Decrypt,

    #[error("handshake echo did not match the challenge")]
    HandshakeMismatch,
}

/// Messages that decrypt fine but do not follow the expected sequence.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("challenge has {got} bytes, expected {expected}")]
    ChallengeSize { expected: usize, got: usize },

    #[error("file list is not valid UTF-8")]
    FileListEncoding,

    #[error("file response is empty")]
    EmptyResponse,

    #[error("unknown file response status {0:#04x}")]
    UnknownStatus(u8),
}

/// Invalid command line input, rejected before any network activity.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("token must be {format}")]
    TokenFormat { format: &'static str },

    #[error("invalid address: {0}")]
    Address(String),

    #[error("empty list of files")]
    EmptyFileList,

    #[error("empty filename at position: {0}")]
    EmptyFileName(usize),

    #[error("maximum number of files is {max}")]
    TooManyFiles { max: usize },

    #[error("maximum filename length is {max}: {name}")]
    FileNameTooLong { name: String, max: usize },

    #[error("filename cannot contain '..': {0}")]
    ParentEscape(String),

    #[error("filename must be relative: {0}")]
    AbsolutePath(String),

    #[error("filename cannot contain ',': {0}")]
    Delimiter(String),

    #[error("cannot create output path {path}: {reason}")]
    OutputPath { path: String, reason: String },
}

/// Everything that can end a single session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("encryption failed")]
    Encryption,

    #[error("failed to write {path}: {source}")]
    FileSystem { path: String, source: io::Error },

    #[error("handshake failed: {0}")]
    Handshake(Box<SessionError>),

    #[error("file transfer failed: {0}")]
    Transfer(Box<SessionError>),
}

impl SessionError {
    /// Tags an error with the handshake step.
    pub fn in_handshake(self) -> Self {
        SessionError::Handshake(Box::new(self))
    }

    /// Tags an error with the file transfer step.
    pub fn in_transfer(self) -> Self {
        SessionError::Transfer(Box::new(self))
    }

    /// The innermost error, with the step tags removed.
    pub fn root(&self) -> &SessionError {
        match self {
            SessionError::Handshake(inner) | SessionError::Transfer(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), SessionError::Authentication(_))
    }
}

impl From<EncryptionError> for SessionError {
    fn from(_: EncryptionError) -> Self {
        SessionError::Encryption
    }
}

/// Top-level error returned by the commands.
#[derive(Error, Debug)]
pub enum GetterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("TTL of {0:?} reached")]
    TtlExpired(Duration),

    #[error("server does not have the requested files: {}", .0.join(", "))]
    MissingFiles(Vec<String>),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = GetterError> = std::result::Result<T, E>;
