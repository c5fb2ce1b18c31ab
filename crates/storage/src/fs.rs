//! Directory-tree backend for all three stores.
//!
//! ```text
//! <root>/signatures/<name>.json
//! <root>/samples/<name>_samples.json
//! <root>/programs/<id>/program.json
//! <root>/programs/<id>/metadata.json
//! ```
//!
//! A program directory becomes visible only once both files are written:
//! they are staged under a hidden `.staging-<id>` directory and published
//! with one rename. Hidden directories are ignored when listing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::record::{
    artifact_digest, is_file_safe, ProgramArtifact, ProgramMetadata, Sample, Signature,
};
use crate::traits::{ProgramStore, SampleStore, SignatureCatalog};

/// File name of the compiled artifact inside a program directory.
pub const ARTIFACT_FILE: &str = "program.json";

/// File name of the lineage sidecar inside a program directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Where each collection lives on disk.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub signatures_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub programs_dir: PathBuf,
}

impl StoreLayout {
    /// The conventional layout under one root directory.
    pub fn under(root: &Path) -> Self {
        StoreLayout {
            signatures_dir: root.join("signatures"),
            samples_dir: root.join("samples"),
            programs_dir: root.join("programs"),
        }
    }
}

/// Filesystem implementation of [`SignatureCatalog`], [`SampleStore`] and
/// [`ProgramStore`].
pub struct FsStore {
    layout: StoreLayout,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (creating directories as needed) the conventional layout under
    /// `root`, seeding the built-in PLN signature into an empty catalog.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        Self::with_layout(StoreLayout::under(root))
    }

    /// Open an explicit layout.
    pub fn with_layout(layout: StoreLayout) -> Result<Self, StorageError> {
        for dir in [
            &layout.signatures_dir,
            &layout.samples_dir,
            &layout.programs_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        let store = FsStore {
            layout,
            write_lock: Mutex::new(()),
        };
        store.seed_defaults()?;
        Ok(store)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn seed_defaults(&self) -> Result<(), StorageError> {
        if !self.signature_names()?.is_empty() {
            return Ok(());
        }
        let pln = Signature::pln_default();
        info!(signature = %pln.name, "seeding default signature into empty catalog");
        write_json_atomic(&self.signature_path(&pln.name), &pln)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn signature_path(&self, name: &str) -> PathBuf {
        self.layout.signatures_dir.join(format!("{}.json", name))
    }

    fn samples_path(&self, signature: &str) -> PathBuf {
        self.layout
            .samples_dir
            .join(format!("{}_samples.json", signature))
    }

    fn program_dir(&self, id: &str) -> Result<PathBuf, StorageError> {
        if !is_file_safe(id) {
            return Err(StorageError::ProgramNotFound { id: id.to_string() });
        }
        Ok(self.layout.programs_dir.join(id))
    }

    fn signature_names(&self) -> Result<Vec<String>, StorageError> {
        let dir = &self.layout.signatures_dir;
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))? {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_file_safe(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Pick `program_<secs>`, or `program_<secs>_<n>` if that is taken.
    fn allocate_program_id(&self) -> String {
        let secs = OffsetDateTime::now_utc().unix_timestamp();
        let base = format!("program_{}", secs);
        if !self.layout.programs_dir.join(&base).exists() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.layout.programs_dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn read_metadata(&self, dir: &Path, id: &str) -> Result<ProgramMetadata, StorageError> {
        let path = dir.join(METADATA_FILE);
        if !path.is_file() {
            return Err(StorageError::ProgramNotFound { id: id.to_string() });
        }
        let mut metadata: ProgramMetadata = read_json(&path)?;
        metadata.id = id.to_string();
        Ok(metadata)
    }

    /// Read the artifact bytes of `dir` and check them against the digests
    /// recorded in `metadata`.
    fn read_artifact_bytes(
        &self,
        dir: &Path,
        metadata: &ProgramMetadata,
    ) -> Result<Vec<u8>, StorageError> {
        let path = dir.join(ARTIFACT_FILE);
        if !path.is_file() {
            return Err(StorageError::ArtifactMissing {
                id: metadata.id.clone(),
            });
        }
        let bytes = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        if metadata.artifact_sha256.is_empty() {
            return Ok(bytes);
        }
        let actual = artifact_digest(&bytes);
        let pending = metadata.previous_sha256.as_deref() == Some(actual.as_str());
        if actual != metadata.artifact_sha256 && !pending {
            return Err(StorageError::ArtifactCorrupt {
                id: metadata.id.clone(),
                reason: format!(
                    "digest {} does not match recorded {}",
                    actual, metadata.artifact_sha256
                ),
            });
        }
        Ok(bytes)
    }

    /// Point every program compiled for `from` at `to`. Caller holds the
    /// write lock. Returns how many programs were rewritten.
    fn retarget_programs(&self, from: &str, to: &str) -> Result<usize, StorageError> {
        let mut moved = 0;
        for mut metadata in ProgramStore::list(self)? {
            if metadata.signature_name != from {
                continue;
            }
            let path = self.program_dir(&metadata.id)?.join(METADATA_FILE);
            metadata.signature_name = to.to_string();
            write_json_atomic(&path, &metadata)?;
            moved += 1;
        }
        Ok(moved)
    }
}

/// Current time as an RFC 3339 UTC string.
pub fn timestamp_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::serde(path, e))
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::serde(path, e))?;
    write_bytes_atomic(path, &bytes)
}

// ──────────────────────────────────────────────
// SignatureCatalog
// ──────────────────────────────────────────────

impl SignatureCatalog for FsStore {
    fn add(&self, signature: Signature) -> Result<(), StorageError> {
        signature
            .validate()
            .map_err(|violation| StorageError::InvalidSignature {
                name: signature.name.clone(),
                violation,
            })?;
        let _guard = self.lock();
        let path = self.signature_path(&signature.name);
        if path.exists() {
            return Err(StorageError::SignatureExists {
                name: signature.name,
            });
        }
        write_json_atomic(&path, &signature)?;
        info!(signature = %signature.name, "signature added");
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Signature, StorageError> {
        let not_found = || StorageError::SignatureNotFound {
            name: name.to_string(),
        };
        if !is_file_safe(name) {
            return Err(not_found());
        }
        let path = self.signature_path(name);
        if !path.is_file() {
            return Err(not_found());
        }
        read_json(&path)
    }

    fn list(&self) -> Result<Vec<Signature>, StorageError> {
        let mut out = Vec::new();
        for name in self.signature_names()? {
            match SignatureCatalog::get(self, &name) {
                Ok(sig) => out.push(sig),
                Err(e) => warn!(signature = %name, error = %e, "skipping unreadable signature"),
            }
        }
        Ok(out)
    }

    fn edit(&self, name: &str, signature: Signature) -> Result<(), StorageError> {
        signature
            .validate()
            .map_err(|violation| StorageError::InvalidSignature {
                name: signature.name.clone(),
                violation,
            })?;
        let _guard = self.lock();
        let old_path = self.signature_path(name);
        if !is_file_safe(name) || !old_path.is_file() {
            return Err(StorageError::SignatureNotFound {
                name: name.to_string(),
            });
        }

        if signature.name == name {
            write_json_atomic(&old_path, &signature)?;
        } else {
            let new_path = self.signature_path(&signature.name);
            if new_path.exists() {
                return Err(StorageError::SignatureExists {
                    name: signature.name,
                });
            }
            write_json_atomic(&new_path, &signature)?;
            fs::remove_file(&old_path).map_err(|e| StorageError::io(&old_path, e))?;

            let old_samples = self.samples_path(name);
            if old_samples.is_file() {
                let new_samples = self.samples_path(&signature.name);
                fs::rename(&old_samples, &new_samples)
                    .map_err(|e| StorageError::io(&new_samples, e))?;
            }
            let moved = self.retarget_programs(name, &signature.name)?;
            info!(from = %name, to = %signature.name, programs = moved, "signature renamed");
        }
        debug!(signature = %signature.name, "signature rewritten");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.lock();
        let path = self.signature_path(name);
        if !is_file_safe(name) || !path.is_file() {
            return Err(StorageError::SignatureNotFound {
                name: name.to_string(),
            });
        }
        fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
        info!(signature = %name, "signature removed");
        Ok(())
    }
}

// ──────────────────────────────────────────────
// SampleStore
// ──────────────────────────────────────────────

impl SampleStore for FsStore {
    fn load(&self, signature: &str) -> Result<Vec<Sample>, StorageError> {
        if !is_file_safe(signature) {
            return Err(StorageError::SignatureNotFound {
                name: signature.to_string(),
            });
        }
        let path = self.samples_path(signature);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    fn save(&self, signature: &str, samples: &[Sample]) -> Result<(), StorageError> {
        if !is_file_safe(signature) {
            return Err(StorageError::SignatureNotFound {
                name: signature.to_string(),
            });
        }
        let _guard = self.lock();
        write_json_atomic(&self.samples_path(signature), &samples)?;
        debug!(signature = %signature, count = samples.len(), "samples saved");
        Ok(())
    }

    fn update(
        &self,
        signature: &str,
        edit: &mut dyn FnMut(&mut Vec<Sample>) -> Result<(), StorageError>,
    ) -> Result<usize, StorageError> {
        let _guard = self.lock();
        let mut samples = self.load(signature)?;
        edit(&mut samples)?;
        write_json_atomic(&self.samples_path(signature), &samples)?;
        debug!(signature = %signature, count = samples.len(), "samples updated");
        Ok(samples.len())
    }
}

// ──────────────────────────────────────────────
// ProgramStore
// ──────────────────────────────────────────────

impl ProgramStore for FsStore {
    fn list(&self) -> Result<Vec<ProgramMetadata>, StorageError> {
        let dir = &self.layout.programs_dir;
        let mut programs = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))? {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let path = entry.path();
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !path.is_dir() || !is_file_safe(&id) {
                continue;
            }
            match self.read_metadata(&path, &id) {
                Ok(metadata) => programs.push(metadata),
                Err(StorageError::ProgramNotFound { .. }) => {
                    debug!(program = %id, "directory without metadata ignored");
                }
                Err(e) => warn!(program = %id, error = %e, "skipping unreadable program"),
            }
        }
        programs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(programs)
    }

    fn get(&self, id: &str) -> Result<ProgramMetadata, StorageError> {
        let dir = self.program_dir(id)?;
        self.read_metadata(&dir, id)
    }

    fn artifact_exists(&self, id: &str) -> bool {
        match self.program_dir(id) {
            Ok(dir) => dir.join(METADATA_FILE).is_file() && dir.join(ARTIFACT_FILE).is_file(),
            Err(_) => false,
        }
    }

    fn load_artifact(&self, id: &str) -> Result<ProgramArtifact, StorageError> {
        let dir = self.program_dir(id)?;
        let metadata = self.read_metadata(&dir, id)?;
        let bytes = self.read_artifact_bytes(&dir, &metadata)?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::ArtifactCorrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    fn create(
        &self,
        artifact: &ProgramArtifact,
        mut metadata: ProgramMetadata,
    ) -> Result<ProgramMetadata, StorageError> {
        if let Some(base_id) = &metadata.base_program_id {
            let base = ProgramStore::get(self, base_id)?;
            if base.signature_name != metadata.signature_name {
                return Err(StorageError::IncompatibleBase {
                    base_id: base_id.clone(),
                    base_signature: base.signature_name,
                    signature: metadata.signature_name,
                });
            }
        }

        let _guard = self.lock();
        let id = self.allocate_program_id();
        let staging = self.layout.programs_dir.join(format!(".staging-{}", id));
        let final_dir = self.layout.programs_dir.join(&id);

        let artifact_path = staging.join(ARTIFACT_FILE);
        let bytes = serde_json::to_vec_pretty(artifact)
            .map_err(|e| StorageError::serde(&artifact_path, e))?;
        metadata.id = id.clone();
        metadata.artifact_sha256 = artifact_digest(&bytes);
        if metadata.created_at.is_empty() {
            metadata.created_at = timestamp_now();
        }

        let staged = (|| {
            fs::create_dir_all(&staging).map_err(|e| StorageError::io(&staging, e))?;
            fs::write(&artifact_path, &bytes).map_err(|e| StorageError::io(&artifact_path, e))?;
            let metadata_path = staging.join(METADATA_FILE);
            let meta_bytes = serde_json::to_vec_pretty(&metadata)
                .map_err(|e| StorageError::serde(&metadata_path, e))?;
            fs::write(&metadata_path, meta_bytes)
                .map_err(|e| StorageError::io(&metadata_path, e))?;
            fs::rename(&staging, &final_dir).map_err(|e| StorageError::io(&final_dir, e))
        })();

        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                debug!(error = %cleanup, "staging cleanup failed");
            }
            return Err(e);
        }

        info!(
            program = %id,
            signature = %metadata.signature_name,
            base = ?metadata.base_program_id,
            "program registered"
        );
        Ok(metadata)
    }

    fn patch_instructions(&self, id: &str, instructions: &str) -> Result<(), StorageError> {
        let _guard = self.lock();
        let dir = self.program_dir(id)?;
        let mut metadata = self.read_metadata(&dir, id)?;
        let old_bytes = self.read_artifact_bytes(&dir, &metadata)?;
        let artifact_path = dir.join(ARTIFACT_FILE);
        let mut artifact: ProgramArtifact =
            serde_json::from_slice(&old_bytes).map_err(|e| StorageError::ArtifactCorrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        artifact.instructions = instructions.to_string();
        let bytes = serde_json::to_vec_pretty(&artifact)
            .map_err(|e| StorageError::serde(&artifact_path, e))?;

        // Metadata first, accepting both digests, so the artifact verifies
        // at every step of the swap.
        let metadata_path = dir.join(METADATA_FILE);
        metadata.artifact_sha256 = artifact_digest(&bytes);
        metadata.previous_sha256 = Some(artifact_digest(&old_bytes));
        write_json_atomic(&metadata_path, &metadata)?;
        write_bytes_atomic(&artifact_path, &bytes)?;
        metadata.previous_sha256 = None;
        write_json_atomic(&metadata_path, &metadata)?;
        info!(program = %id, "program instructions patched");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.lock();
        let dir = self.program_dir(id)?;
        if !dir.is_dir() {
            return Err(StorageError::ProgramNotFound { id: id.to_string() });
        }
        fs::remove_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        info!(program = %id, "program deleted");
        Ok(())
    }
}
