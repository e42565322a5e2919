//! Image format conversion, delegated to an external program.

use log::{debug, info};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, TexPackError};

/// Extensions treated as convertible images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "eps", "pdf"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Normalize a user-supplied format such as `.PNG` to `png`.
pub fn normalize_format(format: &str) -> String {
    format.trim_start_matches('.').to_ascii_lowercase()
}

pub trait ImageConverter {
    /// Convert `source` to `format` next to it and return the new path.
    fn convert(&self, source: &Path, format: &str) -> Result<PathBuf>;
}

/// Converter running `<program> <source> <target>` (ImageMagick by default).
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub program: OsString,
    pub remove_original: bool,
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self {
            program: OsString::from("magick"),
            remove_original: true,
        }
    }
}

impl ImageConverter for CommandConverter {
    fn convert(&self, source: &Path, format: &str) -> Result<PathBuf> {
        let format = normalize_format(format);
        let target = source.with_extension(&format);
        if target == source {
            return Ok(target);
        }

        debug!("Running {:?} {:?} {:?}", self.program, source, target);
        let output = Command::new(&self.program).arg(source).arg(&target).output()?;
        if !output.status.success() {
            return Err(TexPackError::ImageConversion {
                path: source.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if self.remove_original {
            fs::remove_file(source)?;
        }
        info!("Converted {:?} to {}", source.file_name().unwrap_or_default(), format.to_uppercase());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("plots/fig1.PNG")));
        assert!(is_image(Path::new("fig.pdf")));
        assert!(!is_image(Path::new("refs.bib")));
        assert!(!is_image(Path::new("Makefile")));
    }

    #[test]
    fn test_normalize_format() {
        assert_eq!(normalize_format(".JPG"), "jpg");
        assert_eq!(normalize_format("png"), "png");
    }

    #[test]
    fn test_same_format_is_a_no_op() {
        let converter = CommandConverter {
            program: OsString::from("definitely-not-a-real-converter"),
            remove_original: true,
        };
        let path = Path::new("figure.png");
        assert_eq!(converter.convert(path, "PNG").unwrap(), PathBuf::from("figure.png"));
    }
}
