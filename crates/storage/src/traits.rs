use crate::error::StorageError;
use crate::record::{ProgramArtifact, ProgramMetadata, Sample, Signature};

/// Storage for task signatures, keyed by name.
///
/// Records are replaced whole: `edit` rewrites every field in one step and
/// there is no partial update.
///
/// Implementations must be `Send + Sync` so a single store can be shared
/// between the request path and background jobs.
pub trait SignatureCatalog: Send + Sync {
    /// Insert a new signature. Fails with `SignatureExists` on a duplicate
    /// name and `InvalidSignature` on a structural violation.
    fn add(&self, signature: Signature) -> Result<(), StorageError>;

    /// Read one signature.
    fn get(&self, name: &str) -> Result<Signature, StorageError>;

    /// All signatures, sorted by name.
    fn list(&self) -> Result<Vec<Signature>, StorageError>;

    /// Atomically replace the signature stored under `name`.
    ///
    /// `signature.name` may differ from `name` (a rename); the new name must
    /// not collide with another signature.
    fn edit(&self, name: &str, signature: Signature) -> Result<(), StorageError>;

    /// Delete a signature record. Its samples are left in place.
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// Per-signature sample collections.
///
/// Each collection is an ordered list that is only appended to, replaced
/// entry-by-entry, or deleted from.
pub trait SampleStore: Send + Sync {
    /// All samples for a signature, in stored order. A signature with no
    /// collection yet yields an empty list.
    fn load(&self, signature: &str) -> Result<Vec<Sample>, StorageError>;

    /// Replace the whole collection.
    fn save(&self, signature: &str, samples: &[Sample]) -> Result<(), StorageError>;

    /// Load, edit and save the collection as one step. Returns the new
    /// length.
    ///
    /// The default is not atomic with respect to other writers; backends
    /// shared between threads override it to hold their write lock across
    /// the whole read-modify-write.
    fn update(
        &self,
        signature: &str,
        edit: &mut dyn FnMut(&mut Vec<Sample>) -> Result<(), StorageError>,
    ) -> Result<usize, StorageError> {
        let mut samples = self.load(signature)?;
        edit(&mut samples)?;
        self.save(signature, &samples)?;
        Ok(samples.len())
    }

    /// Append one validated sample; returns its index.
    fn append(&self, signature: &Signature, sample: Sample) -> Result<usize, StorageError> {
        validate_sample(signature, &sample)?;
        let mut sample = Some(sample);
        let len = self.update(&signature.name, &mut |samples| {
            samples.extend(sample.take());
            Ok(())
        })?;
        Ok(len - 1)
    }

    /// Replace the sample at `index` with a full new record.
    fn replace(
        &self,
        signature: &Signature,
        index: usize,
        sample: Sample,
    ) -> Result<(), StorageError> {
        validate_sample(signature, &sample)?;
        let mut sample = Some(sample);
        self.update(&signature.name, &mut |samples| {
            let len = samples.len();
            let slot = samples
                .get_mut(index)
                .ok_or_else(|| StorageError::SampleNotFound {
                    signature: signature.name.clone(),
                    index,
                    len,
                })?;
            if let Some(sample) = sample.take() {
                *slot = sample;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Remove and return the sample at `index`.
    fn delete(&self, signature: &str, index: usize) -> Result<Sample, StorageError> {
        let mut removed = None;
        self.update(signature, &mut |samples| {
            if index >= samples.len() {
                return Err(StorageError::SampleNotFound {
                    signature: signature.to_string(),
                    index,
                    len: samples.len(),
                });
            }
            removed = Some(samples.remove(index));
            Ok(())
        })?;
        removed.ok_or_else(|| StorageError::SampleNotFound {
            signature: signature.to_string(),
            index,
            len: 0,
        })
    }

    /// Append every record of `incoming`. All records are validated first;
    /// one bad record rejects the whole batch. Returns the new total.
    fn import(&self, signature: &Signature, incoming: Vec<Sample>) -> Result<usize, StorageError> {
        for sample in &incoming {
            validate_sample(signature, sample)?;
        }
        let mut incoming = Some(incoming);
        self.update(&signature.name, &mut |samples| {
            samples.extend(incoming.take().into_iter().flatten());
            Ok(())
        })
    }

    /// The collection as a pretty-printed JSON array, the shape `import`
    /// reads back.
    fn export(&self, signature: &str) -> Result<String, StorageError> {
        let samples = self.load(signature)?;
        serde_json::to_string_pretty(&samples).map_err(|source| StorageError::Serde {
            path: format!("samples/{signature}"),
            source,
        })
    }
}

/// Check that `sample` carries every field of `signature`.
pub fn validate_sample(signature: &Signature, sample: &Sample) -> Result<(), StorageError> {
    let missing = signature.missing_fields(sample);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StorageError::InvalidSample {
            signature: signature.name.clone(),
            missing,
        })
    }
}

/// A sample with every signature field set to an empty string.
pub fn empty_sample(signature: &Signature) -> Sample {
    signature
        .all_fields()
        .map(|f| (f.clone(), Default::default()))
        .collect()
}

/// Versioned collection of compiled programs with lineage metadata.
pub trait ProgramStore: Send + Sync {
    /// Metadata of every registered program, newest first.
    fn list(&self) -> Result<Vec<ProgramMetadata>, StorageError>;

    /// Programs compiled for one signature, newest first.
    fn list_for_signature(&self, signature: &str) -> Result<Vec<ProgramMetadata>, StorageError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|m| m.signature_name == signature)
            .collect())
    }

    /// Metadata of one program.
    fn get(&self, id: &str) -> Result<ProgramMetadata, StorageError>;

    /// True when the program is registered and its artifact file is present.
    fn artifact_exists(&self, id: &str) -> bool;

    /// Read and integrity-check a program's artifact.
    fn load_artifact(&self, id: &str) -> Result<ProgramArtifact, StorageError>;

    /// Register a new program. Allocates a fresh id, writes the artifact and
    /// then the metadata, and publishes both together.
    ///
    /// `metadata.id` and `metadata.artifact_sha256` are ignored and filled in
    /// by the store. Returns the stored metadata.
    fn create(
        &self,
        artifact: &ProgramArtifact,
        metadata: ProgramMetadata,
    ) -> Result<ProgramMetadata, StorageError>;

    /// Rewrite the artifact's instruction text, preserving id and lineage.
    fn patch_instructions(&self, id: &str, instructions: &str) -> Result<(), StorageError>;

    /// Delete a program directory.
    fn delete(&self, id: &str) -> Result<(), StorageError>;
}
