//! Assemble a self-contained submission package from a multi-file LaTeX project.
//!
//! The pipeline stitches `\input` trees into one document, copies every support
//! file into a flat output directory, rewrites references to the new names and
//! merges bibliography fragments into a single `references.bib`.

pub mod actions;
pub mod archive;
pub mod bundle;
pub mod config;
pub mod convert;
pub mod error;
pub mod latex;

pub use actions::{actions_for, DiskActions, DryRunActions, FileActions};
pub use bundle::{BundleOptions, BundleOutcome, Bundler};
pub use config::ProjectRoot;
pub use error::{Result, TexPackError};
pub use latex::bibliography::{BibBackend, BibEntry, Bibliography};
pub use latex::locator::{LocateOptions, ReferenceLocator, ReferenceMatch, RegexLocator};
pub use latex::merge::{stitch_bibliography, BibStitchOptions, BibStitchReport, FragmentSource};
pub use latex::parser::{find_all_inputs, resolve_inputs, DocumentNode, ResolveOptions};
pub use latex::stitcher::{stitch_tex_files, StitchOptions};
