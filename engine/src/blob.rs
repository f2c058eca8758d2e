//! The blob store boundary: opaque instance bytes keyed by
//! SOP instance UID. The engine only sees this trait; hosts plug in
//! file system, object storage or in-memory backends.

use dashmap::DashMap;
use snafu::{OptionExt, ResultExt, Snafu};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("No stored object for SOP instance `{}`", sop_instance_uid))]
    NotFound { sop_instance_uid: String },

    #[snafu(display("Storage I/O failure for SOP instance `{}`", sop_instance_uid))]
    Io {
        sop_instance_uid: String,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Opaque object storage keyed by SOP instance UID.
pub trait BlobStore: Send + Sync {
    /// Store the encoded instance bytes together with their
    /// transfer syntax.
    fn put(&self, sop_instance_uid: &str, transfer_syntax_uid: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the encoded instance bytes.
    fn get(&self, sop_instance_uid: &str) -> Result<Vec<u8>>;

    /// Remove the stored instance.
    fn delete(&self, sop_instance_uid: &str) -> Result<()>;
}

/// In-memory blob store, used by tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, (String, Vec<u8>)>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, sop_instance_uid: &str, transfer_syntax_uid: &str, bytes: &[u8]) -> Result<()> {
        self.objects.insert(
            sop_instance_uid.to_string(),
            (transfer_syntax_uid.to_string(), bytes.to_vec()),
        );
        Ok(())
    }

    fn get(&self, sop_instance_uid: &str) -> Result<Vec<u8>> {
        self.objects
            .get(sop_instance_uid)
            .map(|entry| entry.value().1.clone())
            .context(NotFoundSnafu { sop_instance_uid })
    }

    fn delete(&self, sop_instance_uid: &str) -> Result<()> {
        self.objects
            .remove(sop_instance_uid)
            .map(|_| ())
            .context(NotFoundSnafu { sop_instance_uid })
    }
}

/// File system blob store: one `<uid>.dcm` file per instance
/// under a flat root directory.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).context(IoSnafu {
            sop_instance_uid: "",
        })?;
        Ok(FileBlobStore { root })
    }

    fn path_of(&self, sop_instance_uid: &str) -> PathBuf {
        // UIDs are digits and dots, safe as file names
        self.root.join(format!("{}.dcm", sop_instance_uid))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, sop_instance_uid: &str, _transfer_syntax_uid: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.path_of(sop_instance_uid), bytes).context(IoSnafu { sop_instance_uid })
    }

    fn get(&self, sop_instance_uid: &str) -> Result<Vec<u8>> {
        let path = self.path_of(sop_instance_uid);
        if !path.exists() {
            return NotFoundSnafu { sop_instance_uid }.fail();
        }
        fs::read(path).context(IoSnafu { sop_instance_uid })
    }

    fn delete(&self, sop_instance_uid: &str) -> Result<()> {
        let path = self.path_of(sop_instance_uid);
        if !path.exists() {
            return NotFoundSnafu { sop_instance_uid }.fail();
        }
        fs::remove_file(path).context(IoSnafu { sop_instance_uid })
    }
}
