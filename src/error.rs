//! The error taxonomy every bootstrap and relocation operation reports
//! through. Callers branch on [`Error`]'s variants (debug-file discovery
//! selectively swallows a few of them), so this is a `thiserror` enum
//! rather than an opaque `anyhow::Error`.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A syscall failed; carries errno and the operation that failed.
    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed ELF, note, or descriptor.
    #[error("malformed ELF: {0}")]
    ElfFormat(String),

    /// The `object` crate reported an error while parsing an ELF file.
    #[error("ELF library error: {0}")]
    Libelf(#[from] object::Error),

    /// A named entity (section, symbol, module, mapping) was searched for
    /// and not found.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// An ELF file was found but lacks usable debug information.
    #[error("missing debug info: {0}")]
    MissingDebug(String),

    /// The source file is not a core dump, or the core has no usable
    /// notes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Parser sanity failure (bad kallsyms line, bad /proc file, ...).
    #[error("{0}")]
    Other(String),

    /// Numeric value out of range during parsing.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Sentinel meaning "operation intentionally short-circuited", e.g. a
    /// mapping was merged into its predecessor instead of appended.
    #[error("stop")]
    Stop,
}

impl Error {
    pub fn os(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Os {
            context: context.into(),
            source,
        }
    }

    pub fn elf_format(msg: impl fmt::Display) -> Self {
        Error::ElfFormat(msg.to_string())
    }

    pub fn lookup(msg: impl fmt::Display) -> Self {
        Error::Lookup(msg.to_string())
    }

    pub fn missing_debug(msg: impl fmt::Display) -> Self {
        Error::MissingDebug(msg.to_string())
    }

    pub fn invalid_argument(msg: impl fmt::Display) -> Self {
        Error::InvalidArgument(msg.to_string())
    }

    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    pub fn overflow(msg: impl fmt::Display) -> Self {
        Error::Overflow(msg.to_string())
    }

    /// True for errors that debug-file discovery tolerates and advances
    /// past: `ENOENT`, "not an ELF", and `MISSING_DEBUG`.
    pub fn is_tolerable_during_discovery(&self) -> bool {
        match self {
            Error::MissingDebug(_) => true,
            Error::Os { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Error::Libelf(_) => true,
            _ => false,
        }
    }
}
