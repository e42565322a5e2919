use indexmap::IndexMap;
use log::debug;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, TexPackError};
use crate::latex::{read_content, COMMENT_MARKER};

/// How a field value was delimited in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Braced(String),
    Quoted(String),
    /// Numbers, string macros and `#` concatenations, kept verbatim.
    Bare(String),
}

impl FieldValue {
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Braced(s) | FieldValue::Quoted(s) | FieldValue::Bare(s) => s,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Braced(s) | FieldValue::Quoted(s) => write!(f, "{{{}}}", s),
            FieldValue::Bare(s) => write!(f, "{}", s),
        }
    }
}

/// Custom bibliography entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    pub key: String,
    pub entry_type: String,
    pub fields: IndexMap<String, FieldValue>,
}

/// Builder for BibEntry to allow for cleaner creation
pub struct BibEntryBuilder {
    key: String,
    entry_type: String,
    fields: IndexMap<String, FieldValue>,
}

impl BibEntryBuilder {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), FieldValue::Braced(value.into()));
        self
    }

    pub fn build(self) -> BibEntry {
        BibEntry {
            key: self.key,
            entry_type: self.entry_type,
            fields: self.fields,
        }
    }
}

impl BibEntry {
    pub fn new(key: String, entry_type: String) -> Self {
        Self {
            key,
            entry_type,
            fields: IndexMap::new(),
        }
    }

    pub fn builder(key: impl Into<String>, entry_type: impl Into<String>) -> BibEntryBuilder {
        BibEntryBuilder::new(key, entry_type)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(FieldValue::as_str)
    }

    pub fn to_bibtex(&self) -> String {
        let mut output = format!("@{}{{{},\n", self.entry_type, self.key);
        for (name, value) in &self.fields {
            output.push_str(&format!("  {} = {},\n", name, value));
        }
        output.push_str("}\n");
        output
    }
}

/// Parser used to read fragment files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BibBackend {
    /// Built-in brace-balanced scanner.
    #[default]
    Native,
}

impl FromStr for BibBackend {
    type Err = TexPackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "bibtexparser" => Ok(BibBackend::Native),
            other => Err(TexPackError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Ordered entry store: the first entry seen for a key is the one kept.
#[derive(Debug, Default, Clone)]
pub struct Bibliography {
    entries: IndexMap<String, BibEntry>,
}

impl Bibliography {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entry` unless its key is already present. Returns whether it was added.
    pub fn insert(&mut self, entry: BibEntry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub fn get(&self, key: &str) -> Option<&BibEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BibEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize every entry in insertion order.
    pub fn to_bibtex(&self) -> String {
        self.entries
            .values()
            .map(BibEntry::to_bibtex)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse BibTeX source into a store, keeping the first of any repeated keys.
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let mut bibliography = Self::new();
        for entry in parse_entries(&clean_bibtex(content))? {
            bibliography.insert(entry);
        }
        Ok(bibliography)
    }
}

/// Read every entry of a fragment file, in file order.
pub fn parse_bibtex_file(path: &Path, backend: BibBackend) -> Result<Vec<BibEntry>> {
    let content = read_content(path)?;
    match backend {
        BibBackend::Native => parse_entries(&clean_bibtex(&content)).map_err(|reason| TexPackError::MalformedBibtex {
            path: path.to_path_buf(),
            reason,
        }),
    }
}

/// Drop whole-line `%` comments.
pub fn clean_bibtex(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with(COMMENT_MARKER))
        .map(|line| format!("{}\n", line))
        .collect()
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Index of the brace closing the one at `open`.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Index of the `)` ending a parenthesized entry, ignoring any inside braces.
fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.checked_sub(1)?,
            b')' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_entries(content: &str) -> std::result::Result<Vec<BibEntry>, String> {
    let bytes = content.as_bytes();
    let mut entries = Vec::new();
    let mut i = 0usize;

    while let Some(offset) = content[i..].find('@') {
        let at = i + offset;
        let mut j = at + 1;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        let entry_type = content[at + 1..j].to_ascii_lowercase();
        j = skip_ws(bytes, j);

        // A stray `@` (an email address in free text) is not an entry.
        if entry_type.is_empty() || j >= bytes.len() || (bytes[j] != b'{' && bytes[j] != b'(') {
            i = at + 1;
            continue;
        }

        let end = if bytes[j] == b'{' {
            matching_brace(bytes, j)
        } else {
            matching_paren(bytes, j)
        }
        .ok_or_else(|| format!("unterminated @{} entry at byte {}", entry_type, at))?;

        let body = &content[j + 1..end];
        i = end + 1;

        if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
            debug!("Skipping @{} block", entry_type);
            continue;
        }
        entries.push(parse_body(entry_type, body)?);
    }

    Ok(entries)
}

fn parse_body(entry_type: String, body: &str) -> std::result::Result<BibEntry, String> {
    let (key, rest) = match body.find(',') {
        Some(comma) => (body[..comma].trim(), &body[comma + 1..]),
        None => (body.trim(), ""),
    };
    if key.is_empty() {
        return Err(format!("@{} entry without a citation key", entry_type));
    }

    let mut entry = BibEntry::new(key.to_string(), entry_type);
    let bytes = rest.as_bytes();
    let mut pos = 0usize;

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != b',' {
            pos += 1;
        }
        let name = rest[name_start..pos].trim().to_ascii_lowercase();
        if pos >= bytes.len() || bytes[pos] != b'=' {
            return Err(format!("field {:?} in {} has no value", name, key));
        }

        let (value, next) = parse_value(rest, skip_ws(bytes, pos + 1))
            .ok_or_else(|| format!("unterminated value for field {:?} in {}", name, key))?;
        entry.fields.insert(name, value);
        pos = next;
    }

    Ok(entry)
}

/// Parse one field value starting at `start`; returns it with the index after it.
fn parse_value(rest: &str, start: usize) -> Option<(FieldValue, usize)> {
    let bytes = rest.as_bytes();
    let mut parts = Vec::new();
    let mut pos = start;

    loop {
        pos = skip_ws(bytes, pos);
        if pos >= bytes.len() {
            break;
        }
        match bytes[pos] {
            b'{' => {
                let close = matching_brace(bytes, pos)?;
                parts.push(FieldValue::Braced(rest[pos + 1..close].to_string()));
                pos = close + 1;
            }
            b'"' => {
                let mut depth = 0usize;
                let mut k = pos + 1;
                while k < bytes.len() {
                    match bytes[k] {
                        b'{' => depth += 1,
                        b'}' => depth = depth.saturating_sub(1),
                        b'"' if depth == 0 && bytes[k - 1] != b'\\' => break,
                        _ => {}
                    }
                    k += 1;
                }
                if k >= bytes.len() {
                    return None;
                }
                parts.push(FieldValue::Quoted(rest[pos + 1..k].to_string()));
                pos = k + 1;
            }
            _ => {
                let token_start = pos;
                while pos < bytes.len() && bytes[pos] != b',' && bytes[pos] != b'#' && !bytes[pos].is_ascii_whitespace() {
                    pos += 1;
                }
                parts.push(FieldValue::Bare(rest[token_start..pos].to_string()));
            }
        }

        let after = skip_ws(bytes, pos);
        if after < bytes.len() && bytes[after] == b'#' {
            pos = after + 1;
            continue;
        }
        break;
    }

    let value = if parts.len() == 1 {
        parts.pop()?
    } else {
        FieldValue::Bare(rest[start..pos].trim().to_string())
    };
    Some((value, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
% exported from a reference manager
@Article{smith2020,
  title = {Deep {L}earning for {Everyone}},
  author = "Smith, Alice and Doe, John",
  year = 2020,
  month = jan # "~1",
}

@string{ieee = "IEEE"}

@inproceedings(doe2021,
  title={Second Paper},
  booktitle = ieee
)
"#;

    #[test]
    fn test_parse_entries_and_fields() {
        let bib = Bibliography::parse(SAMPLE).unwrap();
        assert_eq!(bib.len(), 2);

        let smith = bib.get("smith2020").unwrap();
        assert_eq!(smith.entry_type, "article");
        assert_eq!(smith.get("title"), Some("Deep {L}earning for {Everyone}"));
        assert_eq!(smith.get("author"), Some("Smith, Alice and Doe, John"));
        assert_eq!(smith.fields["year"], FieldValue::Bare("2020".to_string()));
        assert_eq!(smith.get("month"), Some(r#"jan # "~1""#));

        let doe = bib.get("doe2021").unwrap();
        assert_eq!(doe.entry_type, "inproceedings");
        assert_eq!(doe.get("booktitle"), Some("ieee"));
    }

    #[test]
    fn test_first_entry_wins() {
        let content = "@misc{x, title={Foo}}\n@misc{x, title={Bar}}\n@misc{y, title={Baz}}";
        let bib = Bibliography::parse(content).unwrap();
        assert_eq!(bib.len(), 2);
        assert_eq!(bib.get("x").unwrap().get("title"), Some("Foo"));
        let keys: Vec<_> = bib.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_write_format() {
        let entry = BibEntry::builder("k", "book").field("title", "T").build();
        let mut bib = Bibliography::new();
        bib.insert(entry);
        assert_eq!(bib.to_bibtex(), "@book{k,\n  title = {T},\n}\n");
    }

    #[test]
    fn test_written_output_parses_back() {
        let bib = Bibliography::parse(SAMPLE).unwrap();
        let reparsed = Bibliography::parse(&bib.to_bibtex()).unwrap();
        assert_eq!(reparsed.len(), bib.len());

        let original = bib.get("smith2020").unwrap();
        let written = reparsed.get("smith2020").unwrap();
        for (name, value) in &original.fields {
            assert_eq!(written.get(name), Some(value.as_str()), "field {}", name);
        }
    }

    #[test]
    fn test_unterminated_entry() {
        assert!(Bibliography::parse("@article{broken, title={oops}").is_err());
    }

    #[test]
    fn test_email_addresses_are_not_entries() {
        let bib = Bibliography::parse("contact me at someone@example.org\n@misc{a,}").unwrap();
        assert_eq!(bib.len(), 1);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("native".parse::<BibBackend>().unwrap(), BibBackend::Native);
        assert!(matches!(
            "pybtex".parse::<BibBackend>(),
            Err(TexPackError::UnsupportedBackend(name)) if name == "pybtex"
        ));
    }
}
