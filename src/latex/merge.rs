//! Merge bibliography fragments into one deduplicated `.bib` file.

use chrono::Local;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::actions::{actions_for, FileActions};
use crate::error::{Result, TexPackError};
use crate::latex::bibliography::{parse_bibtex_file, BibBackend, Bibliography};

/// Where the fragments to merge come from.
#[derive(Debug, Clone)]
pub enum FragmentSource {
    /// Every `*.bib` directly inside this directory (plus `other_dirs`).
    Directory(PathBuf),
    /// An explicit, ordered list of fragment files.
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct BibStitchOptions {
    /// Resolve relative source and output paths against the project path.
    pub prepend_project: bool,
    /// Extra directories (relative to the project) searched for a directory source.
    pub other_dirs: Vec<PathBuf>,
    /// Move fragments under `<backup_dir>/backup/YYYY-MM-DD` on cleanup instead of deleting them.
    pub backup_dir: Option<PathBuf>,
    pub backend: BibBackend,
}

impl Default for BibStitchOptions {
    fn default() -> Self {
        Self {
            prepend_project: true,
            other_dirs: Vec::new(),
            backup_dir: None,
            backend: BibBackend::Native,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BibStitchReport {
    pub output_file: PathBuf,
    /// Fragments that were read, in processing order.
    pub fragments: Vec<PathBuf>,
    /// Fragments that could not be read or parsed; they are never cleaned up.
    pub skipped: Vec<PathBuf>,
    /// Entries dropped because an earlier fragment already defined the key.
    pub duplicates: usize,
    pub bibliography: Bibliography,
}

impl BibStitchReport {
    pub fn unique_entries(&self) -> usize {
        self.bibliography.len()
    }
}

/// `*.bib` files directly inside `dir`, sorted by name.
fn bib_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "bib") {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Fragment files in `bibtex_dir` and `other_dirs`, relative to `project_path`.
///
/// `None` for `bibtex_dir` searches the project directory itself.
pub fn get_bibtex_files(project_path: &Path, bibtex_dir: Option<&Path>, other_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut directories = vec![bibtex_dir.map_or_else(|| project_path.to_path_buf(), |d| project_path.join(d))];
    directories.extend(other_dirs.iter().map(|d| project_path.join(d)));

    let mut seen = HashSet::new();
    let mut bibtex_files = Vec::new();
    for directory in directories {
        if !directory.is_dir() {
            warn!("Bibliography directory not found: {:?}. Skipping...", directory);
            continue;
        }
        for file in bib_files_in(&directory)? {
            let relative = file.strip_prefix(project_path).map(Path::to_path_buf).unwrap_or(file);
            if seen.insert(relative.clone()) {
                bibtex_files.push(relative);
            }
        }
    }
    Ok(bibtex_files)
}

/// Merge fragments into `output_file`, first occurrence of a key winning.
///
/// With `dry_run` nothing is written, moved or deleted; the would-be actions
/// are logged instead.
pub fn stitch_bibliography(
    project_path: &Path,
    source: FragmentSource,
    output_file: &Path,
    cleanup: bool,
    dry_run: bool,
    options: &BibStitchOptions,
) -> Result<BibStitchReport> {
    stitch_bibliography_with(actions_for(dry_run), project_path, source, output_file, cleanup, options)
}

pub fn stitch_bibliography_with(
    actions: &dyn FileActions,
    project_path: &Path,
    source: FragmentSource,
    output_file: &Path,
    cleanup: bool,
    options: &BibStitchOptions,
) -> Result<BibStitchReport> {
    let resolve = |path: &Path| {
        if options.prepend_project {
            project_path.join(path)
        } else {
            path.to_path_buf()
        }
    };
    let output_file = resolve(output_file);

    let files_to_process = match source {
        FragmentSource::Directory(dir) => {
            let dir = resolve(&dir);
            if !dir.is_dir() {
                return Err(TexPackError::InvalidSource(format!(
                    "{} is not a directory of .bib files",
                    dir.display()
                )));
            }
            let mut seen = HashSet::new();
            let mut files = Vec::new();
            let extra = options.other_dirs.iter().map(|d| project_path.join(d));
            for directory in std::iter::once(dir).chain(extra) {
                if !directory.is_dir() {
                    warn!("Bibliography directory not found: {:?}. Skipping...", directory);
                    continue;
                }
                files.extend(bib_files_in(&directory)?.into_iter().filter(|f| seen.insert(f.clone())));
            }
            files
        }
        FragmentSource::Files(files) => files.iter().map(|f| resolve(f)).collect(),
    };

    let mut bibliography = Bibliography::new();
    let mut fragments = Vec::new();
    let mut skipped = Vec::new();
    let mut duplicates = 0usize;

    for file_path in files_to_process {
        let entries = match parse_bibtex_file(&file_path, options.backend) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read bibliography fragment {:?}: {}", file_path, e);
                skipped.push(file_path);
                continue;
            }
        };
        debug!("{} entries fetched from {:?}", entries.len(), file_path.file_name().unwrap_or_default());

        for entry in entries {
            if !bibliography.insert(entry) {
                duplicates += 1;
            }
        }
        fragments.push(file_path);
    }

    let summary = format!(
        "{} unique entries across {} bibtex files ({} duplicates dropped)",
        bibliography.len(),
        fragments.len(),
        duplicates
    );
    if actions.is_dry_run() {
        info!("{}", summary);
        info!("Dry-Run: Entries stitched to {:?}", output_file);
    } else {
        debug!("{}", summary);
    }

    actions.write(&output_file, &bibliography.to_bibtex())?;
    if !actions.is_dry_run() {
        info!("Bibtex entries stitched to: {:?}", output_file);
    }

    if cleanup {
        cleanup_fragments(actions, project_path, &fragments, &output_file, options)?;
    }

    Ok(BibStitchReport {
        output_file,
        fragments,
        skipped,
        duplicates,
        bibliography,
    })
}

fn cleanup_fragments(
    actions: &dyn FileActions,
    project_path: &Path,
    fragments: &[PathBuf],
    output_file: &Path,
    options: &BibStitchOptions,
) -> Result<()> {
    let is_output = |path: &Path| {
        path == output_file
            || matches!((path.canonicalize(), output_file.canonicalize()), (Ok(a), Ok(b)) if a == b)
    };
    let targets: Vec<&PathBuf> = fragments.iter().filter(|f| !is_output(f)).collect();

    match &options.backup_dir {
        Some(backup_dir) => {
            let timestamp = Local::now().format("%Y-%m-%d").to_string();
            let backup = project_path.join(backup_dir).join("backup").join(timestamp);
            actions.create_dir_all(&backup)?;
            for file_path in targets {
                let Some(name) = file_path.file_name() else {
                    continue;
                };
                actions.rename(file_path, &backup.join(name))?;
            }
        }
        None => {
            for file_path in targets {
                actions.remove_file(file_path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_get_bibtex_files_relative_and_deduplicated() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("citation")).unwrap();
        fs::create_dir_all(dir.path().join("extra")).unwrap();
        fs::write(dir.path().join("citation/b.bib"), "").unwrap();
        fs::write(dir.path().join("citation/a.bib"), "").unwrap();
        fs::write(dir.path().join("citation/notes.txt"), "").unwrap();
        fs::write(dir.path().join("extra/c.bib"), "").unwrap();

        let files = get_bibtex_files(
            dir.path(),
            Some(Path::new("citation")),
            &[PathBuf::from("extra"), PathBuf::from("citation"), PathBuf::from("missing")],
        )
        .unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("citation/a.bib"),
                PathBuf::from("citation/b.bib"),
                PathBuf::from("extra/c.bib"),
            ]
        );
    }

    #[test]
    fn test_directory_source_must_exist() {
        let dir = tempdir().unwrap();
        let result = stitch_bibliography(
            dir.path(),
            FragmentSource::Directory(PathBuf::from("nowhere")),
            Path::new("out.bib"),
            false,
            true,
            &BibStitchOptions::default(),
        );
        assert!(matches!(result, Err(TexPackError::InvalidSource(_))));
    }

    #[test]
    fn test_malformed_fragment_is_skipped_and_kept() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.bib"), "@misc{a, title={A}}").unwrap();
        fs::write(dir.path().join("bad.bib"), "@misc{b, title={B}").unwrap();

        let report = stitch_bibliography(
            dir.path(),
            FragmentSource::Files(vec![PathBuf::from("good.bib"), PathBuf::from("bad.bib")]),
            Path::new("references.bib"),
            true,
            false,
            &BibStitchOptions::default(),
        )
        .unwrap();

        assert_eq!(report.unique_entries(), 1);
        assert_eq!(report.skipped, vec![dir.path().join("bad.bib")]);
        assert!(!dir.path().join("good.bib").exists());
        assert!(dir.path().join("bad.bib").exists());
    }
}
