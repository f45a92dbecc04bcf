//! Writing stored results to disk

use crate::error::{Error, Result};
use crate::qr::QrColor;
use crate::sink::ResultStore;
use image::{RgbaImage, imageops};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Characters that are not allowed in file names on common platforms
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Outcome of [`export_store`]
#[derive(Debug, Default, Serialize)]
pub struct ExportSummary {
    /// Files written, in store order
    pub saved: Vec<PathBuf>,
    /// `(source string, error message)` for every file that could not be written
    pub failures: Vec<(String, String)>,
}

/// Turn an arbitrary source string into a file stem.
///
/// Each run of invalid characters becomes a single `_`, as does a run of
/// trailing dots; the result is cut to `max_len` characters.
pub fn safe_file_name(input: &str, max_len: usize) -> String {
    let head = input.trim_end_matches('.');
    let trailing_dots = head.len() != input.len();
    let head = if trailing_dots {
        head.trim_end_matches(is_invalid)
    } else {
        head
    };

    let mut name = String::with_capacity(input.len());
    let mut in_run = false;
    for c in head.chars() {
        if is_invalid(c) {
            if !in_run {
                name.push('_');
            }
            in_run = true;
        } else {
            name.push(c);
            in_run = false;
        }
    }

    if trailing_dots || name.is_empty() {
        name.push('_');
    }

    match name.char_indices().nth(max_len.max(1)) {
        Some((cut, _)) => name[..cut].to_string(),
        None => name,
    }
}

fn is_invalid(c: char) -> bool {
    INVALID_CHARS.contains(&c) || c.is_control()
}

/// First free path among `stem.png`, `stem_1.png`, `stem_2.png`, ...
pub fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let mut path = dir.join(format!("{stem}.png"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{counter}.png"));
        counter += 1;
    }
    path
}

/// Save one image as PNG.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(Error::from)
}

/// Write every stored code to `dir` as PNG. A failing file does not stop the others.
pub fn export_store(store: &ResultStore, dir: &Path, max_name_len: usize) -> Result<ExportSummary> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create directory {}: {e}", dir.display()),
        ))
    })?;

    let mut summary = ExportSummary::default();
    for (text, image) in store.iter() {
        let path = unique_path(dir, &safe_file_name(text, max_name_len));
        match save_png(image, &path) {
            Ok(()) => {
                tracing::debug!(%text, path = %path.display(), "Saved QR code");
                summary.saved.push(path);
            }
            Err(error) => {
                tracing::warn!(%text, %error, "Failed to save QR code");
                summary.failures.push((text.to_string(), error.to_string()));
            }
        }
    }

    tracing::info!(
        saved = summary.saved.len(),
        failed = summary.failures.len(),
        dir = %dir.display(),
        "Export finished"
    );
    Ok(summary)
}

/// Columns of the smallest near-square grid holding `count` cells.
pub fn grid_columns(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let mut columns = (count as f64).sqrt() as usize;
    while columns * columns < count {
        columns += 1;
    }
    columns
}

/// Compose every stored code into one grid image, in delivery order.
///
/// Returns `None` for an empty store.
pub fn render_sheet(store: &ResultStore, padding: u32, background: QrColor) -> Option<RgbaImage> {
    let count = store.len();
    let columns = grid_columns(count);
    if columns == 0 {
        return None;
    }
    let rows = count.div_ceil(columns);

    let cell_w = store.iter().map(|(_, img)| img.width()).max()?;
    let cell_h = store.iter().map(|(_, img)| img.height()).max()?;
    let width = columns as u32 * (cell_w + padding) + padding;
    let height = rows as u32 * (cell_h + padding) + padding;

    let mut sheet = RgbaImage::from_pixel(width, height, background.to_rgba());
    for (index, (_, image)) in store.iter().enumerate() {
        let col = (index % columns) as u32;
        let row = (index / columns) as u32;
        let x = padding + col * (cell_w + padding) + (cell_w - image.width()) / 2;
        let y = padding + row * (cell_h + padding) + (cell_h - image.height()) / 2;
        imageops::replace(&mut sheet, &**image, i64::from(x), i64::from(y));
    }
    Some(sheet)
}

/// Render and save the contact sheet. Returns `false` when there was nothing to draw.
pub fn save_sheet(store: &ResultStore, path: &Path, padding: u32, background: QrColor) -> Result<bool> {
    let Some(sheet) = render_sheet(store, padding, background) else {
        return Ok(false);
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    save_png(&sheet, path)?;
    tracing::info!(path = %path.display(), codes = store.len(), "Saved contact sheet");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_name_replaces_invalid_runs() {
        assert_eq!(safe_file_name("https://x.com/a?b=c", 100), "https_x.com_a_b=c");
        assert_eq!(safe_file_name("a@b.com", 100), "a@b.com");
        assert_eq!(safe_file_name("tab\there", 100), "tab_here");
    }

    #[test]
    fn test_safe_file_name_trailing_dots() {
        assert_eq!(safe_file_name("https://x.com/..", 100), "https_x.com_");
        assert_eq!(safe_file_name("...", 100), "_");
    }

    #[test]
    fn test_safe_file_name_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let name = safe_file_name(&long, 100);
        assert_eq!(name.chars().count(), 100);
    }

    #[test]
    fn test_grid_columns() {
        assert_eq!(grid_columns(0), 0);
        assert_eq!(grid_columns(1), 1);
        assert_eq!(grid_columns(2), 2);
        assert_eq!(grid_columns(4), 2);
        assert_eq!(grid_columns(5), 3);
        assert_eq!(grid_columns(10), 4);
    }
}
