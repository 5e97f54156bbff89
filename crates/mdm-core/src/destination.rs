//! Placement of finished payloads: one move from the staging path to a
//! file named after the task inside the output directory.

use std::path::{Path, PathBuf};

use crate::error::{DestinationError, DownloadError};

/// Sanitizes a task name for use as a single Linux path component.
///
/// - Replaces NUL, `/`, `\`, whitespace and control characters with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing dots and underscores (so `..` cannot escape)
/// - Limits length to 255 bytes (NAME_MAX)
pub fn sanitize_name(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let c = if c == '\0' || c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// Output directory plus collision policy.
#[derive(Debug, Clone)]
pub struct Destination {
    output_dir: PathBuf,
    overwrite: bool,
}

impl Destination {
    pub fn new(output_dir: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            overwrite,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final path for a task named `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, DestinationError> {
        let file_name = sanitize_name(name);
        if file_name.is_empty() {
            return Err(DestinationError::EmptyName(name.to_string()));
        }
        Ok(self.output_dir.join(file_name))
    }

    /// Moves `staged` to the destination for `name` and returns the final path.
    ///
    /// An existing file is a collision unless `overwrite` is set. The staged
    /// file is removed on failure so nothing is left in the staging area.
    pub fn place(&self, staged: &Path, name: &str) -> Result<PathBuf, DownloadError> {
        let result = self.try_place(staged, name);
        if result.is_err() && staged.exists() {
            if let Err(e) = std::fs::remove_file(staged) {
                tracing::warn!(path = %staged.display(), "could not remove staged file: {}", e);
            }
        }
        result
    }

    fn try_place(&self, staged: &Path, name: &str) -> Result<PathBuf, DownloadError> {
        let target = self.path_for(name)?;
        let move_err = |source: std::io::Error| DownloadError::Move {
            from: staged.to_path_buf(),
            to: target.clone(),
            source,
        };
        if !self.overwrite && target.exists() {
            return Err(move_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "destination already exists",
            )));
        }
        std::fs::create_dir_all(&self.output_dir).map_err(move_err)?;
        std::fs::rename(staged, &target).map_err(move_err)?;
        Ok(target)
    }
}
