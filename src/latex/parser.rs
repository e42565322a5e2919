use indexmap::IndexMap;
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;
use crate::latex::locator::{LocateOptions, ReferenceLocator, ReferenceMatch, RegexLocator};
use crate::latex::stitcher::{stitch_tex_files, StitchOptions};
use crate::latex::{is_commented, INPUT_REGEX};

/// One source file in the `\input` tree.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentNode {
    /// Name as written in the parent's `\input`, normalized to end in `.tex`.
    pub name: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub content: String,
    /// Included documents keyed by name, in order of first occurrence.
    pub inputs: IndexMap<String, DocumentNode>,
}

impl DocumentNode {
    /// This node followed by all of its descendants, depth-first.
    pub fn descendants(&self) -> Vec<&DocumentNode> {
        let mut nodes = vec![self];
        for child in self.inputs.values() {
            nodes.extend(child.descendants());
        }
        nodes
    }

    /// Number of levels below this node.
    pub fn height(&self) -> usize {
        self.inputs.values().map(|child| child.height() + 1).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Deepest include level that is still loaded; the root is level 0.
    pub max_depth: usize,
    /// Resolve includes relative to the including file instead of the project.
    pub prepend_path: bool,
    pub locate: LocateOptions,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            prepend_path: false,
            locate: LocateOptions::default(),
        }
    }
}

/// Build the include tree rooted at `file_path` (relative to `project_dir`).
///
/// Returns `None` when the root itself is missing. Missing children and
/// anything deeper than `max_depth` are logged and left out of the tree.
pub fn resolve_inputs(project_dir: &Path, file_path: &str, options: &ResolveOptions) -> Result<Option<DocumentNode>> {
    let path = project_dir.join(file_path);
    resolve_inputs_with(&RegexLocator, project_dir, file_path, &path, 0, options)
}

pub fn resolve_inputs_with(
    locator: &dyn ReferenceLocator,
    project_dir: &Path,
    name: &str,
    path: &Path,
    depth: usize,
    options: &ResolveOptions,
) -> Result<Option<DocumentNode>> {
    if depth > options.max_depth {
        warn!("Maximum recursion depth reached at {}. Stopping.", name);
        return Ok(None);
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("File not found: {:?}. Skipping...", path);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let mut node = DocumentNode {
        name: name.to_string(),
        path: path.to_path_buf(),
        content: String::new(),
        inputs: IndexMap::new(),
    };

    for cap in INPUT_REGEX.captures_iter(&content) {
        let (Some(whole), Some(arg)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        if is_commented(&content, whole.start()) {
            continue;
        }
        let input_file = arg.as_str().trim();

        // The coarse pass above also fires on odd arguments; only keep names the
        // locator recognizes as a real include.
        if locator.locate(input_file, &content, &options.locate).is_none() {
            debug!("Skipping unrecognized input {:?} in {}", input_file, name);
            continue;
        }

        let input_name = if input_file.ends_with(".tex") {
            input_file.to_string()
        } else {
            format!("{}.tex", input_file)
        };
        if node.inputs.contains_key(&input_name) {
            continue;
        }

        let input_path = if options.prepend_path {
            path.parent().unwrap_or(project_dir).join(&input_name)
        } else {
            project_dir.join(&input_name)
        };

        if let Some(child) = resolve_inputs_with(locator, project_dir, &input_name, &input_path, depth + 1, options)? {
            node.inputs.insert(input_name, child);
        }
    }

    node.content = content;
    Ok(Some(node))
}

#[derive(Debug, Clone, Default)]
pub struct FindInputsOptions {
    /// Inline all `\input`s of the main file before searching.
    pub stitch_first: bool,
    /// Drop files whose relative path contains any of these.
    pub exclusions: Vec<String>,
    pub stitch: StitchOptions,
}

/// Every non-hidden project file that the main document references.
///
/// Keys are paths relative to `project_path` with `/` separators, in walk order.
pub fn find_all_inputs(
    project_path: &Path,
    main_file: &str,
    options: &FindInputsOptions,
) -> Result<IndexMap<String, ReferenceMatch>> {
    let main_path = project_path.join(main_file);

    let content = if options.stitch_first {
        stitch_tex_files(project_path, main_file, None, &options.stitch)?
    } else {
        fs::read_to_string(&main_path)?
    };

    let mut results = IndexMap::new();
    let walker = WalkDir::new(project_path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(project_path) else {
            continue;
        };
        if entry.path() == main_path {
            continue;
        }
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if options.exclusions.iter().any(|exc| relative_path.contains(exc.as_str())) {
            continue;
        }

        if let Some(found) = RegexLocator.locate(&relative_path, &content, &options.stitch.resolve.locate) {
            results.insert(relative_path, found);
        }
    }

    debug!("{} referenced files found in {:?}", results.len(), project_path);
    Ok(results)
}

/// Relative paths of the files [`find_all_inputs`] reports.
pub fn find_support_files(project_path: &Path, main_file: &str, options: &FindInputsOptions) -> Result<Vec<String>> {
    Ok(find_all_inputs(project_path, main_file, options)?.into_keys().collect())
}
