pub mod bibliography;
pub mod locator;
pub mod merge;
pub mod parser;
pub mod stitcher;

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use crate::error::Result;

pub const COMMENT_MARKER: char = '%';

// Commonly used regex patterns compiled once
pub(crate) static INPUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\input(?:\[[^\]]*\])?\{([^}]+?)\}").expect("Invalid input regex pattern")
});

/// Split `path` into stem and extension (extension keeps its leading dot).
///
/// Dots that start the final path component do not count, so `.latexmkrc`
/// has no extension.
pub fn split_ext(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    let name = &path[name_start..];
    let leading_dots = name.len() - name.trim_start_matches('.').len();

    match name.rfind('.') {
        Some(dot) if dot >= leading_dots && dot > 0 => {
            let split = name_start + dot;
            (&path[..split], &path[split..])
        }
        _ => (path, ""),
    }
}

/// Whether the text at byte offset `pos` sits behind an unescaped `%` on its line.
pub fn is_commented(content: &str, pos: usize) -> bool {
    let line_start = content[..pos].rfind('\n').map_or(0, |i| i + 1);
    let before = &content[line_start..pos];
    let bytes = before.as_bytes();

    bytes.iter().enumerate().any(|(i, &b)| {
        if b != b'%' {
            return false;
        }
        // `\%` is a literal percent sign; `\\%` starts a comment again.
        let backslashes = bytes[..i].iter().rev().take_while(|&&c| c == b'\\').count();
        backslashes % 2 == 0
    })
}

pub fn read_content(file_path: &Path) -> Result<String> {
    Ok(fs::read_to_string(file_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("plots/fig1.png"), ("plots/fig1", ".png"));
        assert_eq!(split_ext("sections/intro"), ("sections/intro", ""));
        assert_eq!(split_ext("v1.2/intro"), ("v1.2/intro", ""));
        assert_eq!(split_ext(".latexmkrc"), (".latexmkrc", ""));
        assert_eq!(split_ext("refs.tar.gz"), ("refs.tar", ".gz"));
    }

    #[test]
    fn test_is_commented() {
        let content = "text\n% \\input{a}\n\\input{b} % \\input{c}\n50\\% \\input{d}";
        assert!(is_commented(content, content.find("\\input{a}").unwrap()));
        assert!(!is_commented(content, content.find("\\input{b}").unwrap()));
        assert!(is_commented(content, content.find("\\input{c}").unwrap()));
        assert!(!is_commented(content, content.find("\\input{d}").unwrap()));
    }
}
