use log::{debug, info, warn};
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;

use crate::actions::FileActions;
use crate::error::{Result, TexPackError};
use crate::latex::locator::{command_regex, CommandSet, ReferenceLocator, RegexLocator};
use crate::latex::parser::{resolve_inputs_with, DocumentNode, ResolveOptions};
use crate::latex::{is_commented, read_content, split_ext, COMMENT_MARKER};

#[derive(Debug, Clone, Default)]
pub struct StitchOptions {
    pub resolve: ResolveOptions,
    /// Includes whose name contains any of these are left as they are.
    pub exclude: Vec<String>,
    /// Includes whose name contains any of these are commented out instead of inlined.
    pub exclude_with_comment: Vec<String>,
    /// Never write the output file, only return the stitched text.
    pub content_only: bool,
}

/// Inline the whole `\input` tree of `main_file` into one document.
///
/// When `output_file` is given (relative to `project_dir`) and `content_only`
/// is off, the result is also written there.
pub fn stitch_tex_files(
    project_dir: &Path,
    main_file: &str,
    output_file: Option<&Path>,
    options: &StitchOptions,
) -> Result<String> {
    stitch_tex_files_with(&RegexLocator, project_dir, main_file, output_file, options)
}

pub fn stitch_tex_files_with(
    locator: &dyn ReferenceLocator,
    project_dir: &Path,
    main_file: &str,
    output_file: Option<&Path>,
    options: &StitchOptions,
) -> Result<String> {
    let main_path = project_dir.join(main_file);
    let root = resolve_inputs_with(locator, project_dir, main_file, &main_path, 0, &options.resolve)?
        .ok_or_else(|| TexPackError::MissingMainFile(main_path.clone()))?;

    let stitched = stitch_node(locator, &root, options);

    match output_file {
        Some(output) if !options.content_only => {
            let output_path = project_dir.join(output);
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&output_path, &stitched)?;
            info!("Stitched file created: {:?}", output_path);
        }
        _ => {}
    }

    Ok(stitched)
}

fn stitch_node(locator: &dyn ReferenceLocator, node: &DocumentNode, options: &StitchOptions) -> String {
    let mut content = node.content.clone();

    for (input_file, input_node) in &node.inputs {
        debug!("Stitching \\input{{{}}}", input_file);

        if options.exclude.iter().any(|exc| input_file.contains(exc.as_str())) {
            continue;
        }

        let (base_name, _) = split_ext(input_file);
        let pattern = match command_regex(base_name, CommandSet::Inputs) {
            Ok(re) => re,
            Err(e) => {
                warn!("Could not build input pattern for {}: {}", input_file, e);
                continue;
            }
        };

        if options.exclude_with_comment.iter().any(|exc| input_file.contains(exc.as_str())) {
            content = comment_out(&pattern, &content);
            continue;
        }

        if locator.locate(input_file, &content, &options.resolve.locate).is_none() {
            warn!("No \\input found for {} in {}; leaving it unresolved", input_file, node.name);
            continue;
        }

        let input_content = stitch_node(locator, input_node, options);
        content = replace_uncommented(&pattern, &content, |_| input_content.clone());
    }

    content
}

fn replace_uncommented<F>(pattern: &Regex, content: &str, mut replacement: F) -> String
where
    F: FnMut(&str) -> String,
{
    pattern
        .replace_all(content, |caps: &Captures| {
            let whole = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            if whole.starts_with(COMMENT_MARKER) || is_commented(content, start) {
                whole.to_string()
            } else {
                replacement(whole)
            }
        })
        .into_owned()
}

fn comment_out(pattern: &Regex, content: &str) -> String {
    replace_uncommented(pattern, content, |command| format!("{}{}", COMMENT_MARKER, command))
}

/// Apply literal `previous -> update` replacements to a project file, in order.
pub fn update_paths(
    project_path: &Path,
    tex_file: &str,
    updates: &[(String, String)],
    actions: &dyn FileActions,
) -> Result<()> {
    let file_path = project_path.join(tex_file);
    let mut content = read_content(&file_path)?;

    for (previous, update) in updates {
        debug!("Updating {} to {}", previous, update);
        content = content.replace(previous.as_str(), update);
    }

    actions.write(&file_path, &content)
}
