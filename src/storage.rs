//! JSON record files for the vault.
//!
//! A record is serialized in full and swapped into place in one step, so a
//! reader never sees a half-written profile or a slot from a different save.

use anyhow::{Context, Result, anyhow};
use getrandom::fill;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
#[cfg(unix)]
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Location of one JSON record.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the record.
    pub fn load_record<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("{} is not a valid record", self.path.display()))
    }

    /// Serialize `record` as pretty JSON and replace the file with it.
    ///
    /// Missing parent directories are created. On unix the file is readable
    /// by its owner only.
    pub fn save_record<T: Serialize>(&self, record: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(record).context("failed to serialize record")?;
        self.replace_with(&json)
    }

    fn replace_with(&self, contents: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let staged = self.staging_path()?;
        let mut file = owner_only()
            .open(&staged)
            .with_context(|| format!("failed to create {}", staged.display()))?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = self.swap_in(&staged) {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }

        // ReplaceFileW writes through on windows
        #[cfg(unix)]
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    /// Hidden sibling of the record, `.<name>.<16 hex>.partial`. Staying in
    /// the same directory keeps the swap on one filesystem.
    fn staging_path(&self) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .context("record path has no file name")?
            .to_string_lossy();

        let mut tag = [0u8; 8];
        fill(&mut tag).map_err(|e| anyhow!("random generator unavailable: {e}"))?;

        Ok(self
            .path
            .with_file_name(format!(".{name}.{}.partial", hex::encode(tag))))
    }

    #[cfg(not(target_os = "windows"))]
    fn swap_in(&self, staged: &Path) -> Result<()> {
        fs::rename(staged, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }

    /// `ReplaceFileW` keeps the record's identity and ACLs but requires an
    /// existing target, so the first save is a plain rename.
    #[cfg(target_os = "windows")]
    fn swap_in(&self, staged: &Path) -> Result<()> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            return fs::rename(staged, &self.path)
                .with_context(|| format!("failed to create {}", self.path.display()));
        }

        let wide = |p: &Path| -> Vec<u16> {
            p.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
        };
        let target = wide(self.path.as_path());
        let source = wide(staged);

        // SAFETY: both buffers are NUL-terminated UTF-16 and outlive the call;
        // the optional arguments are null.
        let ok = unsafe {
            ReplaceFileW(
                target.as_ptr(),
                source.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to replace {}", self.path.display()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn owner_only() -> OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(0o600);
    options
}

#[cfg(not(unix))]
fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    options
}
