//! Gather a stitched manuscript and its support files into one flat directory.

use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::actions::FileActions;
use crate::convert::{is_image, normalize_format, ImageConverter};
use crate::error::{Result, TexPackError};
use crate::latex::locator::{ReferenceLocator, RegexLocator};
use crate::latex::merge::{get_bibtex_files, stitch_bibliography_with, BibStitchOptions, BibStitchReport, FragmentSource};
use crate::latex::split_ext;
use crate::latex::stitcher::{stitch_tex_files_with, StitchOptions};

/// Name of the merged bibliography written into the output directory.
pub const MERGED_BIBLIOGRAPHY: &str = "references";

#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Wipe an existing output directory before populating it.
    pub fresh_start: bool,
    /// File name of the stitched document inside the output directory.
    pub main_name: String,
    /// Renames applied to support files, keyed by original basename.
    pub new_names: HashMap<String, String>,
    /// Convert every copied image to this format (e.g. `png`).
    pub image_format: Option<String>,
    /// Leave references on commented-out lines untouched.
    pub exclude_comments: bool,
    /// Merge copied `.bib` fragments into one `references.bib`.
    pub stitch_bibtex: bool,
    /// Project directories whose `.bib` files are also merged.
    pub extra_bib_dirs: Vec<PathBuf>,
    /// Treat `output_dir` as relative to the project.
    pub prepend_project: bool,
    pub stitch: StitchOptions,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            fresh_start: true,
            main_name: "manuscript.tex".to_string(),
            new_names: HashMap::new(),
            image_format: None,
            exclude_comments: true,
            stitch_bibtex: true,
            extra_bib_dirs: Vec::new(),
            prepend_project: false,
            stitch: StitchOptions {
                content_only: true,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    /// Original relative path -> path in the output directory.
    pub remapped: IndexMap<String, PathBuf>,
    /// Support files that no command in the document refers to.
    pub unreferenced: Vec<String>,
    pub bibliography: Option<BibStitchReport>,
    pub content: String,
}

/// `base` itself, or the first `base_NN` for which `dir/<name>.<ext>` is free for every ext.
fn unique_stem(dir: &Path, base: &str, exts: &[&str], claimed: &HashSet<PathBuf>) -> String {
    let is_free = |stem: &str| {
        exts.iter().all(|ext| {
            let candidate = dir.join(format!("{}{}", stem, ext));
            !candidate.exists() && !claimed.contains(&candidate)
        })
    };

    if is_free(base) {
        return base.to_string();
    }
    let mut count = 1usize;
    loop {
        let stem = format!("{}_{:02}", base, count);
        if is_free(&stem) {
            return stem;
        }
        count += 1;
    }
}

fn unique_destination(dir: &Path, filename: &str, claimed: &HashSet<PathBuf>) -> PathBuf {
    let (base, ext) = split_ext(filename);
    dir.join(format!("{}{}", unique_stem(dir, base, &[ext], claimed), ext))
}

fn file_name_string(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// `content` with every byte inside `ranges` blanked to a space.
fn mask_ranges(content: &str, ranges: &[Range<usize>]) -> String {
    if ranges.is_empty() {
        return content.to_string();
    }
    let mut bytes = content.as_bytes().to_vec();
    for range in ranges {
        bytes[range.clone()].fill(b' ');
    }
    // Ranges sit on char boundaries, so blanking them keeps the text valid UTF-8.
    String::from_utf8(bytes).unwrap_or_else(|_| content.to_string())
}

/// Move `range` to account for `edit` being replaced by `new_len` bytes.
///
/// `range` either ends before `edit`, starts after it, or contains it.
fn shift_range(range: &mut Range<usize>, edit: &Range<usize>, new_len: usize) {
    let old_len = edit.end - edit.start;
    if range.start >= edit.end {
        range.start = range.start - old_len + new_len;
    }
    if range.end >= edit.end {
        range.end = range.end - old_len + new_len;
    }
}

pub struct Bundler<'a> {
    actions: &'a dyn FileActions,
    converter: &'a dyn ImageConverter,
    locator: &'a dyn ReferenceLocator,
}

impl<'a> Bundler<'a> {
    pub fn new(actions: &'a dyn FileActions, converter: &'a dyn ImageConverter) -> Self {
        Self {
            actions,
            converter,
            locator: &RegexLocator,
        }
    }

    pub fn with_locator(mut self, locator: &'a dyn ReferenceLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Build the submission package for `main_file` in `output_dir`.
    ///
    /// `support_files` are paths relative to `project_path`. Unreferenced or
    /// missing files are logged and skipped; the run only fails on I/O errors
    /// and invalid configuration.
    pub fn bundle(
        &self,
        project_path: &Path,
        main_file: &str,
        support_files: &[String],
        output_dir: &Path,
        options: &BundleOptions,
    ) -> Result<BundleOutcome> {
        let output_dir = if options.prepend_project {
            project_path.join(output_dir)
        } else {
            output_dir.to_path_buf()
        };

        self.prepare_output_dir(project_path, &output_dir, options.fresh_start)?;

        // Stitch (but don't yet write) the main document
        let mut content = stitch_tex_files_with(self.locator, project_path, main_file, None, &options.stitch)?;

        let mut claimed = HashSet::new();
        let mut remapped = self.flatten_support_files(project_path, support_files, &output_dir, &mut claimed, options)?;

        if let Some(format) = &options.image_format {
            self.convert_images(&mut remapped, &output_dir, &mut claimed, &normalize_format(format))?;
        }

        let (unreferenced, last_bibliography) = self.rewrite_references(&mut content, &remapped, main_file, options);

        let bibliography = if options.stitch_bibtex {
            self.consolidate_bibliography(project_path, &output_dir, &remapped, &mut claimed, options)?
        } else {
            None
        };

        if let Some(report) = &bibliography {
            let new_bibliography = format!("\\bibliography{{{}}}", MERGED_BIBLIOGRAPHY);
            match last_bibliography {
                Some(span) => {
                    info!("Updating {} to {}", &content[span.clone()], new_bibliography);
                    content.replace_range(span, &new_bibliography);
                }
                None => warn!(
                    "No \\bibliography command found to point at {:?}",
                    report.output_file.file_name().unwrap_or_default()
                ),
            }
        }

        let output_file = output_dir.join(&options.main_name);
        self.actions.write(&output_file, &content)?;
        info!("Submission written to {:?}", output_file);

        Ok(BundleOutcome {
            output_dir,
            output_file,
            remapped,
            unreferenced,
            bibliography,
            content,
        })
    }

    /// Point every reference to a remapped file at its new name.
    ///
    /// Names already written are masked from later lookups, so a new flat name
    /// never captures another file's reference. Returns the unreferenced files
    /// and the span of the last rewritten `\bibliography` command.
    fn rewrite_references(
        &self,
        content: &mut String,
        remapped: &IndexMap<String, PathBuf>,
        main_file: &str,
        options: &BundleOptions,
    ) -> (Vec<String>, Option<Range<usize>>) {
        let mut unreferenced = Vec::new();
        let mut settled: Vec<Range<usize>> = Vec::new();
        let mut last_bibliography: Option<Range<usize>> = None;

        for (old_path, new_path) in remapped {
            let new_base = file_name_string(new_path);
            let (new_name, _) = split_ext(&new_base);
            let mut referenced = false;

            loop {
                let masked = mask_ranges(content, &settled);
                let Some(found) = self.locator.locate(old_path, &masked, &options.stitch.resolve.locate) else {
                    break;
                };
                referenced = true;

                let target = found.span.start + found.target.start..found.span.start + found.target.end;
                if options.exclude_comments && found.commented {
                    settled.push(target);
                    continue;
                }

                let replacement = if found.extension_included { new_base.as_str() } else { new_name };
                if replacement.is_empty() {
                    warn!("No usable name for {} in the output directory; leaving its references", old_path);
                    break;
                }
                debug!(
                    "Updating {} to {} in {}",
                    found.match_base,
                    replacement,
                    &content[found.span.clone()]
                );

                content.replace_range(target.clone(), replacement);
                for range in settled.iter_mut().chain(last_bibliography.iter_mut()) {
                    shift_range(range, &target, replacement.len());
                }
                let mut command = found.span.clone();
                shift_range(&mut command, &target, replacement.len());
                settled.push(target.start..target.start + replacement.len());

                if found.in_command.contains("\\bibliography") {
                    last_bibliography = Some(command);
                }
            }

            if !referenced {
                warn!("{} is not referenced in {}; copied as {:?}", old_path, main_file, new_base);
                unreferenced.push(old_path.clone());
            }
        }

        (unreferenced, last_bibliography)
    }

    fn prepare_output_dir(&self, project_path: &Path, output_dir: &Path, fresh_start: bool) -> Result<()> {
        if !output_dir.exists() {
            return self.actions.create_dir_all(output_dir);
        }
        if !fresh_start {
            return Ok(());
        }
        if project_path.starts_with(output_dir) {
            return Err(TexPackError::InvalidSource(format!(
                "refusing to clear {} because it contains the project",
                output_dir.display()
            )));
        }
        info!("Clearing the output directory: {:?}", output_dir);
        self.actions.remove_dir_all(output_dir)?;
        self.actions.create_dir_all(output_dir)
    }

    fn flatten_support_files(
        &self,
        project_path: &Path,
        support_files: &[String],
        output_dir: &Path,
        claimed: &mut HashSet<PathBuf>,
        options: &BundleOptions,
    ) -> Result<IndexMap<String, PathBuf>> {
        let mut remapped = IndexMap::new();

        for file_path in support_files {
            if remapped.contains_key(file_path) {
                warn!("{} listed more than once; copying it once", file_path);
                continue;
            }
            let src_path = project_path.join(file_path);
            if !src_path.is_file() {
                warn!("Support file not found: {:?}. Skipping...", src_path);
                continue;
            }

            let filename = file_name_string(&src_path);
            let filename = options.new_names.get(&filename).cloned().unwrap_or(filename);
            let new_path = unique_destination(output_dir, &filename, claimed);

            self.actions.copy(&src_path, &new_path)?;
            claimed.insert(new_path.clone());
            remapped.insert(file_path.clone(), new_path);
        }

        Ok(remapped)
    }

    fn convert_images(
        &self,
        remapped: &mut IndexMap<String, PathBuf>,
        output_dir: &Path,
        claimed: &mut HashSet<PathBuf>,
        format: &str,
    ) -> Result<()> {
        info!("Converting Images to {}", format.to_uppercase());

        for (file_path, new_path) in remapped.iter_mut() {
            if !is_image(Path::new(file_path)) {
                continue;
            }
            let current_ext = new_path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase());
            if current_ext.as_deref() == Some(format) {
                continue;
            }

            let mut source = new_path.clone();
            let target = source.with_extension(format);
            if target.exists() || claimed.contains(&target) {
                // Give the copy a stem that is free under both extensions first.
                let source_ext = current_ext.map(|e| format!(".{}", e)).unwrap_or_default();
                let target_ext = format!(".{}", format);
                let filename = file_name_string(&source);
                let (base, _) = split_ext(&filename);
                let stem = unique_stem(output_dir, base, &[source_ext.as_str(), target_ext.as_str()], claimed);
                let renamed = output_dir.join(format!("{}{}", stem, source_ext));
                self.actions.rename(&source, &renamed)?;
                claimed.remove(&source);
                claimed.insert(renamed.clone());
                source = renamed;
            }

            let converted = if self.actions.is_dry_run() {
                info!("Dry-Run: would convert {:?} to {}", source, format);
                source.with_extension(format)
            } else {
                self.converter.convert(&source, format)?
            };
            claimed.remove(&source);
            claimed.insert(converted.clone());
            *new_path = converted;
        }
        Ok(())
    }

    fn consolidate_bibliography(
        &self,
        project_path: &Path,
        output_dir: &Path,
        remapped: &IndexMap<String, PathBuf>,
        claimed: &mut HashSet<PathBuf>,
        options: &BundleOptions,
    ) -> Result<Option<BibStitchReport>> {
        let is_bib = |p: &Path| p.extension().is_some_and(|ext| ext == "bib");
        let mut fragments: Vec<PathBuf> = remapped.values().filter(|p| is_bib(p)).cloned().collect();

        for dir in &options.extra_bib_dirs {
            for relative in get_bibtex_files(project_path, Some(dir.as_path()), &[])? {
                let new_path = unique_destination(output_dir, &file_name_string(&relative), claimed);
                self.actions.copy(&project_path.join(&relative), &new_path)?;
                claimed.insert(new_path.clone());
                fragments.push(new_path);
            }
        }

        // Fragments left from an earlier run when the directory was not wiped.
        if output_dir.is_dir() {
            for entry in std::fs::read_dir(output_dir)? {
                let path = entry?.path();
                if is_bib(&path) && path.is_file() && !fragments.contains(&path) {
                    fragments.push(path);
                }
            }
        }

        if fragments.is_empty() {
            info!("No bibliography fragments to stitch");
            return Ok(None);
        }

        let output_file = output_dir.join(format!("{}.bib", MERGED_BIBLIOGRAPHY));
        info!("Stitching {} bibtex files to {:?}...", fragments.len(), output_file);

        let bib_options = BibStitchOptions {
            prepend_project: false,
            ..Default::default()
        };
        let report = stitch_bibliography_with(
            self.actions,
            project_path,
            FragmentSource::Files(fragments),
            &output_file,
            true,
            &bib_options,
        )?;
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = tempdir().unwrap();
        let mut claimed = HashSet::new();

        let first = unique_destination(dir.path(), "fig.png", &claimed);
        assert_eq!(first, dir.path().join("fig.png"));
        claimed.insert(first);

        let second = unique_destination(dir.path(), "fig.png", &claimed);
        assert_eq!(second, dir.path().join("fig_01.png"));
        claimed.insert(second);

        fs::write(dir.path().join("fig_02.png"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "fig.png", &claimed), dir.path().join("fig_03.png"));
    }

    struct NeverLocator;

    impl ReferenceLocator for NeverLocator {
        fn locate(&self, _: &str, _: &str, _: &crate::latex::locator::LocateOptions) -> Option<crate::latex::locator::ReferenceMatch> {
            None
        }
    }

    #[test]
    fn test_custom_locator_leaves_content_alone() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("paper");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("main.tex"), "\\includegraphics{fig}\n").unwrap();
        fs::write(project.join("fig.png"), "").unwrap();

        let converter = crate::convert::CommandConverter::default();
        let outcome = Bundler::new(&crate::actions::DiskActions, &converter)
            .with_locator(&NeverLocator)
            .bundle(&project, "main.tex", &["fig.png".to_string()], &dir.path().join("out"), &BundleOptions::default())
            .unwrap();

        assert_eq!(outcome.unreferenced, vec!["fig.png".to_string()]);
        assert_eq!(outcome.content, "\\includegraphics{fig}\n");
        assert!(outcome.bibliography.is_none());
    }

    fn rewrite(content: &str, mapping: &[(&str, &str)]) -> (String, Vec<String>, Option<Range<usize>>) {
        let remapped: IndexMap<String, PathBuf> = mapping
            .iter()
            .map(|(old, new)| (old.to_string(), PathBuf::from("/out").join(new)))
            .collect();
        let converter = crate::convert::CommandConverter::default();
        let bundler = Bundler::new(&crate::actions::DryRunActions, &converter);
        let mut content = content.to_string();
        let (unreferenced, last) = bundler.rewrite_references(&mut content, &remapped, "main.tex", &BundleOptions::default());
        (content, unreferenced, last)
    }

    #[test]
    fn test_rewrite_every_reference_to_a_file() {
        let (content, unreferenced, _) = rewrite(
            "\\includegraphics{plots/fig1}\ntext\n% \\includegraphics{plots/fig1}\n\\includegraphics[width=2cm]{plots/fig1.png}\n",
            &[("plots/fig1.png", "fig1.png")],
        );
        assert_eq!(
            content,
            "\\includegraphics{fig1}\ntext\n% \\includegraphics{plots/fig1}\n\\includegraphics[width=2cm]{fig1.png}\n"
        );
        assert!(unreferenced.is_empty());
    }

    #[test]
    fn test_new_name_does_not_capture_later_reference() {
        let (content, _, _) = rewrite(
            "\\includegraphics{figures/plot}\n\\includegraphics{plot}\n",
            &[("figures/plot.png", "plot.png"), ("plot.png", "plot_01.png")],
        );
        assert_eq!(content, "\\includegraphics{plot}\n\\includegraphics{plot_01}\n");
    }

    #[test]
    fn test_bibliography_span_tracks_later_edits() {
        let (content, _, last) = rewrite(
            "% \\bibliography{refs}\n\\bibliography{citation/refs,citation/extra}\n\\includegraphics{figs/a}\n",
            &[("citation/refs.bib", "refs.bib"), ("figs/a.png", "a.png"), ("citation/extra.bib", "extra.bib")],
        );
        let last = last.unwrap();
        assert_eq!(&content[last], "\\bibliography{refs,extra}");
        assert!(content.starts_with("% \\bibliography{refs}\n"));
    }

    #[test]
    fn test_shift_range() {
        let mut after = 10..14;
        shift_range(&mut after, &(2..6), 1);
        assert_eq!(after, 7..11);

        let mut containing = 0..20;
        shift_range(&mut containing, &(2..6), 8);
        assert_eq!(containing, 0..24);

        let mut before = 0..2;
        shift_range(&mut before, &(2..6), 0);
        assert_eq!(before, 0..2);
    }

    #[test]
    fn test_unique_stem_checks_every_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("plot.jpg"), "").unwrap();
        let claimed = HashSet::new();
        assert_eq!(unique_stem(dir.path(), "plot", &[".png", ".jpg"], &claimed), "plot_01");
    }
}
