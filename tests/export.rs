use std::sync::Arc;

use image::GenericImageView;
use tempfile::tempdir;

use qrbatch::export::{self, safe_file_name, unique_path};
use qrbatch::sink::NullPresenter;
use qrbatch::{BatchState, Generator, QrColor, QrDecoder, QrEncoder, input};

fn generated(entries: &[&str]) -> Generator {
    let mut generator = Generator::with_encoder(Arc::new(QrEncoder::default()));
    let report = generator
        .run(input::prepare_entries(entries).items, NullPresenter)
        .expect("batch runs");
    assert_eq!(report.state, BatchState::Completed);
    generator
}

#[test]
fn export_writes_one_png_per_result() {
    let generator = generated(&["a@b.com", "https://x.com/path?q=1"]);
    let dir = tempdir().expect("tempdir");

    let summary = export::export_store(generator.store(), dir.path(), 100).expect("export");
    assert!(summary.failures.is_empty());
    assert_eq!(summary.saved.len(), 2);
    assert!(dir.path().join("a@b.com.png").exists());
    assert!(dir.path().join("https_x.com_path_q=1.png").exists());

    let written = image::open(dir.path().join("a@b.com.png")).expect("open png");
    let decoded = QrDecoder::new().decode(&written).expect("decode exported file");
    assert_eq!(decoded, "a@b.com");
}

#[test]
fn repeated_export_never_overwrites() {
    let generator = generated(&["a@b.com"]);
    let dir = tempdir().expect("tempdir");

    export::export_store(generator.store(), dir.path(), 100).expect("first export");
    let second = export::export_store(generator.store(), dir.path(), 100).expect("second export");

    assert_eq!(second.saved, vec![dir.path().join("a@b.com_1.png")]);
    assert_eq!(
        unique_path(dir.path(), "a@b.com"),
        dir.path().join("a@b.com_2.png")
    );
}

#[test]
fn export_creates_missing_directories() {
    let generator = generated(&["https://example.com"]);
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("out").join("codes");

    let summary = export::export_store(generator.store(), &nested, 100).expect("export");
    assert_eq!(summary.saved.len(), 1);
    assert!(nested.join("https_example.com.png").exists());
}

#[test]
fn long_names_are_truncated() {
    let url = format!("https://example.com/{}", "x".repeat(300));
    let generator = generated(&[url.as_str()]);
    let dir = tempdir().expect("tempdir");

    let summary = export::export_store(generator.store(), dir.path(), 40).expect("export");
    let stem = summary.saved[0]
        .file_stem()
        .and_then(|s| s.to_str())
        .expect("utf-8 stem")
        .to_string();
    assert_eq!(stem, safe_file_name(&url, 40));
    assert_eq!(stem.chars().count(), 40);
}

#[test]
fn contact_sheet_lays_codes_out_in_a_grid() {
    let generator = generated(&["a@b.com", "c@d.com", "e@f.com", "https://x.com", "https://y.com"]);
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sheet.png");

    let written =
        export::save_sheet(generator.store(), &path, 10, QrColor::WHITE).expect("save sheet");
    assert!(written);

    let sheet = image::open(&path).expect("open sheet");
    let cell_w = generator
        .store()
        .iter()
        .map(|(_, img)| img.width())
        .max()
        .expect("non-empty store");
    // Five codes fit a 3x2 grid.
    assert_eq!(sheet.width(), 3 * (cell_w + 10) + 10);
    assert_eq!(sheet.get_pixel(0, 0).0, [255, 255, 255, 255]);
}

#[test]
fn empty_store_writes_no_sheet() {
    let generator = Generator::with_encoder(Arc::new(QrEncoder::default()));
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sheet.png");

    let written =
        export::save_sheet(generator.store(), &path, 10, QrColor::WHITE).expect("save sheet");
    assert!(!written);
    assert!(!path.exists());
}
