//! File side effects behind a strategy object.
//!
//! Everything destructive the bundler and the bibliography stitcher do goes
//! through a [`FileActions`] implementation. A dry run swaps in [`DryRunActions`].

use log::{debug, info};
use std::fs;
use std::path::Path;

use crate::error::Result;

pub trait FileActions {
    /// `true` when this executor only reports what it would do.
    fn is_dry_run(&self) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    /// Move a file, falling back to copy + delete across filesystems.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn write(&self, path: &Path, contents: &str) -> Result<()>;
}

/// Executor that touches the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskActions;

impl FileActions for DiskActions {
    fn is_dry_run(&self) -> bool {
        false
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        debug!("Removing directory {:?}", path);
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("Copying {:?} to {:?}", from, to);
        fs::copy(from, to)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("Moving {:?} to {:?}", from, to);
        if fs::rename(from, to).is_err() {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        debug!("Deleting {:?}", path);
        fs::remove_file(path)?;
        Ok(())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Executor that logs every action and performs none of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunActions;

impl FileActions for DryRunActions {
    fn is_dry_run(&self) -> bool {
        true
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        info!("Dry-Run: would create directory {:?}", path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        info!("Dry-Run: would remove directory {:?}", path);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        info!("Dry-Run: would copy {:?} to {:?}", from, to);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        info!("Would move {:?} to {:?}", from, to);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        info!("Would delete {:?}", path);
        Ok(())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        info!("Dry-Run: would write {} bytes to {:?}", contents.len(), path);
        Ok(())
    }
}

/// Pick the executor matching a `dry_run` flag.
pub fn actions_for(dry_run: bool) -> &'static dyn FileActions {
    if dry_run {
        &DryRunActions
    } else {
        &DiskActions
    }
}
