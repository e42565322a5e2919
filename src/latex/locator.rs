//! Find the command that references a given file inside LaTeX source.
//!
//! This is pattern matching over a fixed command set, not parsing. Callers go
//! through [`ReferenceLocator`] so the matching strategy can be replaced.

use log::warn;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;

use crate::latex::{is_commented, split_ext, COMMENT_MARKER};

const REFERENCE_COMMANDS: &[&str] = &[r"\\input", r"\\usepackage", r"\\bibliography", r"\\includegraphics"];
const INPUT_COMMANDS: &[&str] = &[r"\\input"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSet {
    /// `\input`, `\usepackage`, `\bibliography` and `\includegraphics`.
    References,
    /// `\input` only.
    Inputs,
}

impl CommandSet {
    fn patterns(self) -> &'static [&'static str] {
        match self {
            CommandSet::References => REFERENCE_COMMANDS,
            CommandSet::Inputs => INPUT_COMMANDS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocateOptions {
    /// Skip matches that sit on a commented-out line.
    pub ignore_comments: bool,
}

impl Default for LocateOptions {
    fn default() -> Self {
        Self { ignore_comments: true }
    }
}

/// The authoritative command referencing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceMatch {
    /// Stem as searched, plus the extension when the command spelled it out.
    pub match_base: String,
    /// Full matched command text, options included.
    pub in_command: String,
    pub extension_included: bool,
    pub commented: bool,
    /// Byte range of `in_command` in the searched content.
    pub span: Range<usize>,
    /// Byte range of `match_base` inside `in_command`.
    pub target: Range<usize>,
}

pub trait ReferenceLocator {
    /// Locate the command referencing `file_path` (extension optional) in `content`.
    ///
    /// Returns the first qualifying match; more than one logs a warning.
    fn locate(&self, file_path: &str, content: &str, options: &LocateOptions) -> Option<ReferenceMatch>;
}

/// Build the pattern matching any command in `commands` whose brace argument
/// holds `search` as one whole comma-separated element, optionally followed by
/// an extension.
pub fn command_regex(search: &str, commands: CommandSet) -> Result<Regex, regex::Error> {
    let pattern = format!(
        r"(?:%[ \t]*)?(?:{})(?:\[[^\]]*\])?\{{(?:[^{{}}]*?[,\s])?({})(\.\w+)?(?:[,\s][^{{}}]*)?\}}",
        commands.patterns().join("|"),
        regex::escape(search),
    );
    Regex::new(&pattern)
}

/// Regex-backed locator over the fixed reference command set.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexLocator;

impl ReferenceLocator for RegexLocator {
    fn locate(&self, file_path: &str, content: &str, options: &LocateOptions) -> Option<ReferenceMatch> {
        let (base_name, extension) = split_ext(file_path);

        let pattern = match command_regex(base_name, CommandSet::References) {
            Ok(re) => re,
            Err(e) => {
                warn!("Could not build reference pattern for {}: {}", file_path, e);
                return None;
            }
        };

        let mut matches = pattern.captures_iter(content).filter_map(|cap| {
            let whole = cap.get(0)?;
            let commented = whole.as_str().starts_with(COMMENT_MARKER) || is_commented(content, whole.start());
            if commented && options.ignore_comments {
                return None;
            }

            let stem = cap.get(1)?;
            let ext = cap.get(2);
            // `{fig.jpg}` names a different file than `fig.png`.
            if let Some(written) = ext {
                if !extension.is_empty() && !written.as_str().eq_ignore_ascii_case(extension) {
                    return None;
                }
            }
            let extension_included = !extension.is_empty() && ext.is_some();
            let target_end = match ext {
                Some(ext) if extension_included => ext.end(),
                _ => stem.end(),
            };
            let match_base = if extension_included {
                format!("{}{}", base_name, extension)
            } else {
                base_name.to_string()
            };

            Some(ReferenceMatch {
                match_base,
                in_command: whole.as_str().to_string(),
                extension_included,
                commented,
                span: whole.range(),
                target: stem.start() - whole.start()..target_end - whole.start(),
            })
        });

        let first = matches.next()?;
        let extra = matches.count();
        if extra > 0 {
            warn!(
                "Multiple matches found for {} ({} total); using {:?}",
                file_path,
                extra + 1,
                first.in_command
            );
        }
        Some(first)
    }
}

/// Locate with the default [`RegexLocator`].
pub fn search_for_input(file_path: &str, content: &str, options: &LocateOptions) -> Option<ReferenceMatch> {
    RegexLocator.locate(file_path, content, options)
}
