//! Persistent records and stores for promptsmith.
//!
//! Three collections live behind the traits in this crate:
//!
//! - signatures: one JSON record per task ([`SignatureCatalog`])
//! - samples: one JSON array per signature ([`SampleStore`])
//! - programs: one directory per compiled program holding the artifact
//!   and a `metadata.json` sidecar ([`ProgramStore`])
//!
//! [`FsStore`] implements all three on a local directory tree.

mod error;
mod fs;
mod record;
mod traits;

pub use error::StorageError;
pub use fs::{timestamp_now, FsStore, StoreLayout, ARTIFACT_FILE, METADATA_FILE};
pub use record::{
    artifact_digest, FieldValue, ProgramArtifact, ProgramMetadata, Sample, Signature,
    SignatureViolation,
};
pub use traits::{
    empty_sample, validate_sample, ProgramStore, SampleStore, SignatureCatalog,
};
