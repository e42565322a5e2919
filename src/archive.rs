//! Package a finished submission directory into a single archive.

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{Result, TexPackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = TexPackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "gz" | "tgz" | "tar.gz" => Ok(ArchiveFormat::TarGz),
            "zip" => Ok(ArchiveFormat::Zip),
            other => Err(TexPackError::UnsupportedArchiveFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// Walk a directory, applying the include/exclude filters.
    Directory(PathBuf),
    /// Archive exactly these files.
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Keep only paths containing one of these (when non-empty).
    pub include: Vec<String>,
    /// Drop paths containing any of these.
    pub exclude: Vec<String>,
    /// Keep files whose name starts with `.`.
    pub hidden: bool,
    pub dry_run: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            hidden: false,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub output_file: PathBuf,
    pub files: Vec<PathBuf>,
}

fn collect_files(source: &ArchiveSource, options: &ArchiveOptions) -> Result<(Option<PathBuf>, Vec<PathBuf>)> {
    match source {
        ArchiveSource::Files(files) => Ok((None, files.clone())),
        ArchiveSource::Directory(dir) => {
            if !dir.is_dir() {
                return Err(TexPackError::InvalidSource(format!(
                    "{} is neither a directory nor a file list",
                    dir.display()
                )));
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(dir).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if !options.hidden && entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let display = entry.path().to_string_lossy();
                if options.exclude.iter().any(|pattern| display.contains(pattern.as_str())) {
                    continue;
                }
                if !options.include.is_empty() && !options.include.iter().any(|pattern| display.contains(pattern.as_str())) {
                    continue;
                }
                files.push(entry.path().to_path_buf());
            }
            Ok((Some(dir.clone()), files))
        }
    }
}

/// Name stored inside the archive: relative to the source directory when there is one.
fn archive_name(base: Option<&Path>, file: &Path) -> String {
    let relative = base.and_then(|b| file.strip_prefix(b).ok()).unwrap_or(file);
    relative
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write `<filename>.<ext>` holding the selected files.
///
/// Dry-run only reports the file list.
pub fn archive(source: &ArchiveSource, filename: &Path, format: ArchiveFormat, options: &ArchiveOptions) -> Result<ArchiveReport> {
    let (base, files) = collect_files(source, options)?;
    let output_file = PathBuf::from(format!("{}.{}", filename.display(), format.extension()));
    info!("Archiving {} files to: {:?}", files.len(), output_file);

    if options.dry_run {
        info!("Dry-Run: these files specified:");
        for file in &files {
            info!("  {:?}", file);
        }
        return Ok(ArchiveReport { output_file, files });
    }

    if let Some(parent) = output_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let out = File::create(&output_file)?;
    match format {
        ArchiveFormat::TarGz => {
            let mut tar = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            for file in &files {
                tar.append_path_with_name(file, archive_name(base.as_deref(), file))?;
            }
            tar.into_inner()?.finish()?;
        }
        ArchiveFormat::Zip => {
            let mut zip = ZipWriter::new(out);
            let file_options = SimpleFileOptions::default();
            for file in &files {
                zip.start_file(archive_name(base.as_deref(), file), file_options)?;
                io::copy(&mut File::open(file)?, &mut zip)?;
            }
            zip.finish()?;
        }
    }

    Ok(ArchiveReport { output_file, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    fn populate(dir: &Path) {
        fs::write(dir.join("manuscript.tex"), "body").unwrap();
        fs::write(dir.join("fig1.png"), "png").unwrap();
        fs::write(dir.join(".DS_Store"), "junk").unwrap();
        fs::write(dir.join("notes.log"), "log").unwrap();
    }

    #[test]
    fn test_format_names() {
        assert_eq!("gz".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarGz);
        assert_eq!(".zip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Zip);
        assert!(matches!("bz2".parse::<ArchiveFormat>(), Err(TexPackError::UnsupportedArchiveFormat(_))));
    }

    #[test]
    fn test_dry_run_lists_filtered_files() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let options = ArchiveOptions {
            exclude: vec![".log".to_string()],
            ..Default::default()
        };
        let report = archive(
            &ArchiveSource::Directory(dir.path().to_path_buf()),
            &dir.path().join("submission"),
            ArchiveFormat::TarGz,
            &options,
        )
        .unwrap();

        let names: Vec<String> = report
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["fig1.png", "manuscript.tex"]);
        assert!(!report.output_file.exists());
    }

    #[test]
    fn test_tar_gz_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("out");
        fs::create_dir(&src).unwrap();
        populate(&src);

        let options = ArchiveOptions { dry_run: false, ..Default::default() };
        let report = archive(
            &ArchiveSource::Directory(src.clone()),
            &dir.path().join("submission"),
            ArchiveFormat::TarGz,
            &options,
        )
        .unwrap();

        let mut tar = tar::Archive::new(GzDecoder::new(File::open(&report.output_file).unwrap()));
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["fig1.png", "manuscript.tex", "notes.log"]);
    }

    #[test]
    fn test_zip_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("out");
        fs::create_dir_all(src.join("figs")).unwrap();
        fs::write(src.join("manuscript.tex"), "body").unwrap();
        fs::write(src.join("figs/fig1.png"), "png").unwrap();

        let options = ArchiveOptions { dry_run: false, ..Default::default() };
        let report = archive(
            &ArchiveSource::Directory(src.clone()),
            &dir.path().join("submission"),
            ArchiveFormat::Zip,
            &options,
        )
        .unwrap();
        assert_eq!(report.output_file, dir.path().join("submission.zip"));

        let mut zip = zip::ZipArchive::new(File::open(&report.output_file).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len()).map(|i| zip.by_index(i).unwrap().name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["figs/fig1.png", "manuscript.tex"]);

        let mut body = String::new();
        io::Read::read_to_string(&mut zip.by_name("manuscript.tex").unwrap(), &mut body).unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn test_missing_directory_source() {
        let dir = tempdir().unwrap();
        let result = archive(
            &ArchiveSource::Directory(dir.path().join("absent")),
            &dir.path().join("x"),
            ArchiveFormat::Zip,
            &ArchiveOptions::default(),
        );
        assert!(matches!(result, Err(TexPackError::InvalidSource(_))));
    }
}
