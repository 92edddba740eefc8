//! Turning documents into page images.
//!
//! PDF pages are rasterized with `pdftoppm` into a scratch directory owned by
//! the caller. Everything else is taken to be an image file and decoded when
//! the renderer gets to it.

use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::pipeline::PageInput;

static CREATED: AtomicUsize = AtomicUsize::new(0);

/// A scratch directory removed with everything in it on drop.
#[derive(Debug)]
pub struct WorkingDir {
    path: PathBuf,
}

impl WorkingDir {
    /// Create a fresh directory under the system temporary directory.
    pub fn create() -> Result<Self, Error> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "sweepjet-{}-{}-{}",
            std::process::id(),
            nanos,
            CREATED.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&path)?;
        debug!("working directory {}", path.display());
        Ok(WorkingDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("could not remove {}: {}", self.path.display(), err);
            }
        }
    }
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Rasterize every page of `pdf` at `dpi` into `dir`, returning the page
/// images in page order.
pub fn rasterize_pdf(pdf: &Path, dpi: u32, dir: &WorkingDir) -> Result<Vec<PathBuf>, Error> {
    let stem = pdf
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("page");
    let prefix = dir.path().join(stem);

    info!("rasterizing {} at {} dpi", pdf.display(), dpi);
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-png")
        .arg(pdf)
        .arg(&prefix)
        .output()
        .map_err(|err| Error::Render(format!("could not run pdftoppm: {}", err)))?;

    if !output.status.success() {
        return Err(Error::Render(format!(
            "pdftoppm failed on {}: {}",
            pdf.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    // pdftoppm pads page numbers to equal width, so names sort in page order.
    let mut pages: Vec<PathBuf> = fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().map_or(false, |ext| ext == "png")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(&format!("{}-", stem)))
        })
        .collect();
    pages.sort();

    if pages.is_empty() {
        return Err(Error::Render(format!("{} has no pages", pdf.display())));
    }
    debug!("{} pages from {}", pages.len(), pdf.display());
    Ok(pages)
}

/// Expand the given files into page inputs, rasterizing PDFs into `dir`.
pub fn collect_pages(files: &[PathBuf], dpi: u32, dir: &WorkingDir) -> Result<Vec<PageInput>, Error> {
    let mut pages = Vec::new();
    for file in files {
        if is_pdf(file) {
            pages.extend(rasterize_pdf(file, dpi, dir)?.into_iter().map(PageInput::File));
        } else {
            pages.push(PageInput::File(file.clone()));
        }
    }
    Ok(pages)
}
