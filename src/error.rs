// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur in the storage engine core
#[derive(Debug)]
pub enum Error {
    /// Caller violated an API contract (bad offset, too many iterators, ...)
    BadArgument(&'static str),

    /// A value failed to parse, convert or validate
    BadValue(String),

    /// The named entity does not exist
    NotFound,

    /// The named entity already exists
    Exists,

    /// The parameter is not writable at runtime
    ReadOnly,

    /// An allocation could not be satisfied
    OutOfMemory,

    /// No free blocks remain in the file
    OutOfSpace,

    /// Persisted state is inconsistent or unparsable
    BadMetadata(String),

    /// I/O error
    Io(std::io::Error),

    /// The operation is recognized but not implemented
    Unsupported(&'static str),

    /// Invariant violation (e.g. packed-field overflow)
    Internal(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TieredKvError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::BadValue(value.to_string())
    }
}

/// Crate result
pub type Result<T> = std::result::Result<T, Error>;
