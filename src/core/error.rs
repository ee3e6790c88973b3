use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Invalid compound file signature")]
    InvalidSignature,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Corrupt header: {0}")]
    HeaderCorrupt(String),

    #[error("Invalid name '{name}': {reason}")]
    NameInvalid { name: String, reason: String },

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Entry already exists: {0}")]
    EntryExists(String),

    #[error("Compound file has already been closed")]
    AlreadyDisposed,

    #[error("Invalid sector ID: {0:#010x}")]
    InvalidSectorId(u32),

    #[error("Not writable: {0}")]
    NotWritable(String),

    #[error("Chain corruption: {0}")]
    ChainCorruption(String),

    #[error("Buffer arguments out of range: offset {offset}, count {count}, limit {limit}")]
    BufferArgumentInvalid {
        offset: u64,
        count: usize,
        limit: u64,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CfbError {
    pub(crate) fn name_invalid(name: &str, reason: impl Into<String>) -> Self {
        CfbError::NameInvalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a `ChainCorruption` error and log it.
    ///
    /// Corruption means the file or an allocator invariant is broken; callers
    /// must not retry the operation.
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("{}", message);
        CfbError::ChainCorruption(message)
    }

    /// True for errors raised by argument and state validation, before any
    /// mutation took place. The file is left in its prior valid state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CfbError::NameInvalid { .. }
                | CfbError::EntryNotFound(_)
                | CfbError::EntryExists(_)
                | CfbError::AlreadyDisposed
                | CfbError::NotWritable(_)
                | CfbError::BufferArgumentInvalid { .. }
                | CfbError::InvalidTimestamp(_)
                | CfbError::InvalidOperation(_)
        )
    }
}

impl From<CfbError> for std::io::Error {
    fn from(err: CfbError) -> Self {
        use std::io::ErrorKind;

        let kind = match err {
            CfbError::Io(inner) => return inner,
            CfbError::EntryNotFound(_) => ErrorKind::NotFound,
            CfbError::EntryExists(_) => ErrorKind::AlreadyExists,
            CfbError::NotWritable(_) => ErrorKind::PermissionDenied,
            CfbError::NameInvalid { .. }
            | CfbError::BufferArgumentInvalid { .. }
            | CfbError::InvalidTimestamp(_)
            | CfbError::InvalidOperation(_) => ErrorKind::InvalidInput,
            CfbError::InvalidSignature
            | CfbError::UnsupportedVersion { .. }
            | CfbError::HeaderCorrupt(_)
            | CfbError::InvalidSectorId(_)
            | CfbError::ChainCorruption(_) => ErrorKind::InvalidData,
            CfbError::AlreadyDisposed => ErrorKind::BrokenPipe,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, CfbError>;
