use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::utils::fs::absolute_path;

/// Permission bits of generated data files (e.g. scheduler descriptors).
pub const DATA_FILE_MODE: u32 = 0o644;
/// Permission bits of generated shell scripts.
pub const SCRIPT_FILE_MODE: u32 = 0o755;

/// Writes generated artifacts into a single output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    directory: PathBuf,
}

impl ArtifactWriter {
    /// Creates `directory` (including missing parents) if it does not exist yet.
    pub fn new(directory: &Path) -> crate::Result<Self> {
        std::fs::create_dir_all(directory)?;
        Ok(Self {
            directory: absolute_path(directory)?,
        })
    }

    /// Absolute path of the output directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.directory.join(name)
    }

    /// Writes `content` into `name`, replacing any existing file, and sets its permissions
    /// to `mode`. Returns the absolute path of the written file.
    pub fn write(&self, name: &str, content: &str, mode: u32) -> crate::Result<PathBuf> {
        let path = self.path(name);
        std::fs::write(&path, content)?;
        std::fs::set_permissions(&path, Permissions::from_mode(mode))?;
        log::debug!("Written artifact {} (mode {:o})", path.display(), mode);
        Ok(path)
    }
}
