use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use texpack::archive::{archive, ArchiveFormat, ArchiveOptions, ArchiveSource};
use texpack::convert::CommandConverter;
use texpack::latex::parser::{find_all_inputs, FindInputsOptions};
use texpack::{
    actions_for, stitch_bibliography, stitch_tex_files, BibBackend, BibStitchOptions, BundleOptions, Bundler,
    FragmentSource, ProjectRoot, StitchOptions,
};

/// CLI app for turning a multi-file LaTeX project into a flat submission package
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the LaTeX projects (defaults to $OVERLEAF_ROOT)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inline every \input of the main file into one document
    Stitch {
        /// Project name under the root, or a path to the project
        project: String,
        #[arg(short, long, default_value = "main.tex")]
        main: String,
        /// Output file relative to the project (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Leave includes containing this text untouched
        #[arg(long)]
        exclude: Vec<String>,
        /// Comment out includes containing this text
        #[arg(long)]
        comment_out: Vec<String>,
        #[arg(long, default_value_t = 5)]
        max_depth: usize,
    },
    /// List the project files referenced by the main document
    Inputs {
        project: String,
        #[arg(short, long, default_value = "main.tex")]
        main: String,
        /// Skip files whose path contains this text
        #[arg(long)]
        exclude: Vec<String>,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a flat submission directory
    Bundle {
        project: String,
        /// Output directory
        output: PathBuf,
        #[arg(short, long, default_value = "main.tex")]
        main: String,
        /// Name of the stitched document in the output directory
        #[arg(long, default_value = "manuscript.tex")]
        main_name: String,
        /// Convert images to this format
        #[arg(long)]
        image_format: Option<String>,
        /// Rename a support file, as OLD=NEW (basenames)
        #[arg(long, value_parser = parse_rename)]
        rename: Vec<(String, String)>,
        /// Extra project directories whose .bib files are merged
        #[arg(long)]
        bib_dir: Vec<PathBuf>,
        /// Keep bibliography fragments separate
        #[arg(long)]
        no_bib_stitch: bool,
        /// Keep the existing contents of the output directory
        #[arg(long)]
        keep_existing: bool,
        /// Skip files whose path contains this text
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Merge the .bib fragments of a directory into one file
    Bib {
        project: String,
        /// Directory of fragments, relative to the project
        #[arg(default_value = ".")]
        source: PathBuf,
        #[arg(short, long, default_value = "references.bib")]
        output: PathBuf,
        /// Additional fragment directories, relative to the project
        #[arg(long)]
        other_dir: Vec<PathBuf>,
        /// Remove merged fragments afterwards
        #[arg(long)]
        cleanup: bool,
        /// Move fragments under <DIR>/backup/<date> instead of deleting them
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        #[arg(long, default_value = "native")]
        backend: String,
        /// Write the merged file (only a dry-run report otherwise)
        #[arg(long)]
        write: bool,
    },
    /// List the projects under the root
    Projects {
        /// Skip projects whose name contains this text
        #[arg(long)]
        exclude: Vec<String>,
        /// Keep directory order instead of newest first
        #[arg(long)]
        unsorted: bool,
    },
    /// Pack a directory into a .tar.gz or .zip archive
    Archive {
        source: PathBuf,
        /// Archive name without extension
        filename: PathBuf,
        #[arg(short, long, default_value = "gz")]
        format: String,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        /// Also pack dotfiles
        #[arg(long)]
        hidden: bool,
        /// Write the archive (only list the files otherwise)
        #[arg(long)]
        write: bool,
    },
}

fn parse_rename(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(old, new)| (old.to_string(), new.to_string()))
        .ok_or_else(|| format!("expected OLD=NEW, got {value:?}"))
}

/// A path that exists (or is absolute) is used as is; anything else names a project under the root.
fn project_dir(root: &Option<PathBuf>, project: &str) -> Result<PathBuf> {
    let candidate = Path::new(project);
    if candidate.is_absolute() || candidate.is_dir() {
        return Ok(candidate.to_path_buf());
    }
    let root = ProjectRoot::resolve_or_prompt(root.clone())?;
    Ok(root.project_path(project))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match args.command {
        Command::Stitch {
            project,
            main,
            output,
            exclude,
            comment_out,
            max_depth,
        } => {
            let project_path = project_dir(&args.root, &project)?;
            let mut options = StitchOptions {
                exclude,
                exclude_with_comment: comment_out,
                ..Default::default()
            };
            options.resolve.max_depth = max_depth;

            let stitched = stitch_tex_files(&project_path, &main, output.as_deref(), &options)
                .with_context(|| format!("Failed to stitch {} in {:?}", main, project_path))?;
            if output.is_none() {
                println!("{}", stitched);
            }
        }
        Command::Inputs {
            project,
            main,
            exclude,
            json,
        } => {
            let project_path = project_dir(&args.root, &project)?;
            let options = FindInputsOptions {
                stitch_first: true,
                exclusions: exclude,
                ..Default::default()
            };
            let inputs = find_all_inputs(&project_path, &main, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inputs)?);
            } else {
                for (path, found) in &inputs {
                    println!("{}\t{}", path, found.in_command);
                }
            }
        }
        Command::Bundle {
            project,
            output,
            main,
            main_name,
            image_format,
            rename,
            bib_dir,
            no_bib_stitch,
            keep_existing,
            exclude,
            dry_run,
        } => {
            let project_path = project_dir(&args.root, &project)?;
            let find_options = FindInputsOptions {
                stitch_first: true,
                exclusions: exclude,
                ..Default::default()
            };
            let support_files: Vec<String> = find_all_inputs(&project_path, &main, &find_options)?.into_keys().collect();
            info!("{} support files referenced by {}", support_files.len(), main);

            let options = BundleOptions {
                fresh_start: !keep_existing,
                main_name,
                new_names: rename.into_iter().collect::<HashMap<_, _>>(),
                image_format,
                stitch_bibtex: !no_bib_stitch,
                extra_bib_dirs: bib_dir,
                ..Default::default()
            };
            let converter = CommandConverter::default();
            let outcome = Bundler::new(actions_for(dry_run), &converter)
                .bundle(&project_path, &main, &support_files, &output, &options)
                .with_context(|| format!("Failed to bundle {:?}", project_path))?;

            for path in &outcome.unreferenced {
                info!("Copied but not referenced: {}", path);
            }
            info!("Submission ready in {:?}", outcome.output_dir);
        }
        Command::Bib {
            project,
            source,
            output,
            other_dir,
            cleanup,
            backup_dir,
            backend,
            write,
        } => {
            let project_path = project_dir(&args.root, &project)?;
            let options = BibStitchOptions {
                other_dirs: other_dir,
                backup_dir,
                backend: backend.parse::<BibBackend>()?,
                ..Default::default()
            };
            let report = stitch_bibliography(
                &project_path,
                FragmentSource::Directory(source),
                &output,
                cleanup,
                !write,
                &options,
            )?;
            info!(
                "{} unique entries from {} files ({} duplicates, {} skipped)",
                report.unique_entries(),
                report.fragments.len(),
                report.duplicates,
                report.skipped.len()
            );
        }
        Command::Projects { exclude, unsorted } => {
            let root = ProjectRoot::resolve_or_prompt(args.root)?;
            for project in root.list_projects(&exclude, !unsorted)? {
                let modified: DateTime<Local> = project.modified.into();
                println!("{}\t{}", modified.format("%Y-%m-%d %H:%M"), project.name);
            }
        }
        Command::Archive {
            source,
            filename,
            format,
            include,
            exclude,
            hidden,
            write,
        } => {
            let options = ArchiveOptions {
                include,
                exclude,
                hidden,
                dry_run: !write,
            };
            let report = archive(&ArchiveSource::Directory(source), &filename, format.parse::<ArchiveFormat>()?, &options)?;
            if write {
                info!("Archive written to {:?}", report.output_file);
            }
        }
    }

    Ok(())
}
