//! Generate a small batch of QR codes and save them to a directory
//!
//! Usage: cargo run --example generate_batch

use qrbatch::sink::FnPresenter;
use qrbatch::{Generator, QrBatchConfig, UiEvent, export, input};
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = QrBatchConfig::default();
    let mut generator = Generator::from_config(&config)?;

    let prepared = input::prepare("hello@example.com; https://www.rust-lang.org\nnot-an-entry");
    for rejected in &prepared.rejected {
        println!("✗ skipped '{}': {}", rejected.input, rejected.reason);
    }

    let report = generator.run(
        prepared.items,
        FnPresenter(|event: UiEvent| match event {
            UiEvent::ItemReady(update) => {
                println!("✓ [{}/{}] {}", update.generated, update.total, update.text)
            }
            UiEvent::ItemFailed(item) => println!("✗ {}: {}", item.text, item.reason),
            UiEvent::Finished(status) => println!("  finished: {status:?}"),
        }),
    )?;

    let summary = export::export_store(generator.store(), Path::new("qr_output"), 100)?;
    println!(
        "✓ {} QR codes saved to qr_output/ in {:?}",
        summary.saved.len(),
        report.elapsed
    );

    Ok(())
}
