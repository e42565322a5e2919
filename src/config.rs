use log::{debug, info};
use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, TexPackError};

/// Environment variable consulted when no root is given explicitly.
pub const ROOT_ENV_VAR: &str = "OVERLEAF_ROOT";

/// Directory holding one subdirectory per LaTeX project.
///
/// Library entry points take project paths directly; this value is resolved
/// once by the caller and used to turn project names into paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    path: PathBuf,
}

/// A project directory and its last modification time.
#[derive(Debug, Clone)]
pub struct ProjectEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl ProjectRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve from an explicit value, then from `OVERLEAF_ROOT`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        match env::var(ROOT_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => {
                debug!("Using project root from {}: {}", ROOT_ENV_VAR, value);
                Ok(Self::new(value))
            }
            _ => Err(TexPackError::ProjectRootNotSet),
        }
    }

    /// Like [`ProjectRoot::resolve`], but asks on the terminal as a last resort.
    pub fn resolve_or_prompt(explicit: Option<PathBuf>) -> Result<Self> {
        match Self::resolve(explicit) {
            Ok(root) => Ok(root),
            Err(TexPackError::ProjectRootNotSet) if io::stdin().is_terminal() => {
                let stdin = io::stdin();
                Self::prompt(&mut stdin.lock(), &mut io::stderr())
            }
            Err(e) => Err(e),
        }
    }

    /// Read the root directory from `input`, writing the question to `output`.
    pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Self> {
        write!(output, "Enter the Overleaf root directory: ")?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let answer = line.trim();
        if answer.is_empty() {
            return Err(TexPackError::ProjectRootNotSet);
        }
        Ok(Self::new(answer))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn project_path(&self, project_name: &str) -> PathBuf {
        self.path.join(project_name)
    }

    /// Project directories under the root, newest first when `sort_by_date`.
    ///
    /// Names containing any of `exclusions` are dropped.
    pub fn list_projects(&self, exclusions: &[String], sort_by_date: bool) -> Result<Vec<ProjectEntry>> {
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if exclusions.iter().any(|ex| name.contains(ex.as_str())) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            projects.push(ProjectEntry { name, path, modified });
        }

        if sort_by_date {
            projects.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        }
        info!("Found {} projects under {:?}", projects.len(), self.path);
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_root_wins() {
        let root = ProjectRoot::resolve(Some(PathBuf::from("/tmp/projects"))).unwrap();
        assert_eq!(root.project_path("paper"), PathBuf::from("/tmp/projects/paper"));
    }

    #[test]
    fn test_prompt_reads_line() {
        let mut input = Cursor::new("/data/overleaf\n");
        let mut output = Vec::new();
        let root = ProjectRoot::prompt(&mut input, &mut output).unwrap();

        assert_eq!(root.path(), Path::new("/data/overleaf"));
        assert!(String::from_utf8(output).unwrap().contains("Overleaf root"));
    }

    #[test]
    fn test_prompt_empty_answer() {
        let mut input = Cursor::new("\n");
        let mut output = Vec::new();
        let result = ProjectRoot::prompt(&mut input, &mut output);
        assert!(matches!(result, Err(TexPackError::ProjectRootNotSet)));
    }

    #[test]
    fn test_list_projects_skips_files_and_exclusions() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("thesis")).unwrap();
        fs::create_dir(dir.path().join("paper-draft")).unwrap();
        fs::create_dir(dir.path().join("old-archive")).unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let root = ProjectRoot::new(dir.path());
        let projects = root.list_projects(&["archive".to_string()], false).unwrap();
        let mut names: Vec<_> = projects.into_iter().map(|p| p.name).collect();
        names.sort();

        assert_eq!(names, vec!["paper-draft", "thesis"]);
    }
}
