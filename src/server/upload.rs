//! Temporary storage for uploaded images

use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// An uploaded file written to the upload directory
///
/// The file has a unique random name and is deleted when the guard is
/// dropped, whichever way the request ends.
#[derive(Debug)]
pub struct TempUpload {
    file: NamedTempFile,
}

impl TempUpload {
    /// Write `contents` to a new file in `dir`, keeping `extension`
    pub fn create(dir: &Path, extension: &str, contents: &[u8]) -> Result<Self> {
        let suffix = format!(".{}", extension);
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .rand_bytes(16)
            .tempfile_in(dir)?;

        file.write_all(contents)?;
        file.flush()?;

        debug!("File saved temporarily at {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        debug!("Removing temporary file {}", self.file.path().display());
    }
}
