use crate::record::SignatureViolation;

/// All errors that can be returned by a promptsmith store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No signature with the given name.
    #[error("signature not found: {name}")]
    SignatureNotFound { name: String },

    /// A signature with this name already exists.
    #[error("signature already exists: {name}")]
    SignatureExists { name: String },

    /// The signature record breaks one of its structural rules.
    #[error("invalid signature '{name}': {violation}")]
    InvalidSignature {
        name: String,
        violation: SignatureViolation,
    },

    /// A sample does not carry every field of its signature.
    #[error("sample for '{signature}' is missing fields: {}", missing.join(", "))]
    InvalidSample {
        signature: String,
        missing: Vec<String>,
    },

    /// Sample index out of range for the signature's collection.
    #[error("sample {index} not found for signature '{signature}' ({len} samples)")]
    SampleNotFound {
        signature: String,
        index: usize,
        len: usize,
    },

    /// No program directory (or no metadata) for the given id.
    #[error("program not found: {id}")]
    ProgramNotFound { id: String },

    /// The program directory exists but its artifact file does not.
    #[error("program artifact missing: {id}")]
    ArtifactMissing { id: String },

    /// The artifact on disk does not match the digest recorded at creation.
    #[error("program artifact corrupt: {id} ({reason})")]
    ArtifactCorrupt { id: String, reason: String },

    /// A base program was named whose signature differs from the child's.
    #[error(
        "base program {base_id} belongs to signature '{base_signature}', not '{signature}'"
    )]
    IncompatibleBase {
        base_id: String,
        base_signature: String,
        signature: String,
    },

    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be (de)serialized.
    #[error("malformed record at {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn serde(path: &std::path::Path, source: serde_json::Error) -> Self {
        StorageError::Serde {
            path: path.display().to_string(),
            source,
        }
    }
}
