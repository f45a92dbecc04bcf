//! qrbatch - parallel QR-code generation for email addresses and URLs
//!
//! This library turns a list of email addresses and URLs into styled QR-code
//! images. Work is spread over a bounded worker pool; finished codes are
//! handed to a single consumer thread that owns the result store and notifies
//! a presentation layer item by item.
//!
//! # Features
//!
//! - **Input preparation**: splitting, trimming, deduplication and per-entry validation
//! - **Styled rendering**: custom colours, error-correction level and a centred logo
//! - **Parallel pipeline**: bounded fan-out with cooperative cancellation
//! - **Export**: PNG files with safe names plus an optional contact sheet
//!
//! # Example
//!
//! ```no_run
//! use qrbatch::{Generator, QrBatchConfig, input, sink::NullPresenter};
//!
//! fn main() -> qrbatch::Result<()> {
//!     let config = QrBatchConfig::default();
//!     let mut generator = Generator::from_config(&config)?;
//!
//!     let prepared = input::prepare("a@b.com; https://x.com");
//!     let report = generator.run(prepared.items, NullPresenter)?;
//!
//!     println!("{} codes generated", report.generated);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]

pub mod config;
pub mod error;
pub mod export;
pub mod input;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod qr;
pub mod session;
pub mod sink;

// Re-exports for convenience
pub use error::{Error, Result};

pub use config::{
    ExportOptions, LogRotation, LoggingOptions, PipelineOptions, QrBatchConfig, RenderOptions,
};
pub use input::{ContentKind, PreparedInput, Rejected, WorkItem};
pub use pipeline::{CancellationToken, Pipeline};
pub use qr::{Logo, LogoPool, QrColor, QrDecoder, QrEncoder, RenderStyle, SymbolEncoder};
pub use session::{Generator, RunningBatch};
pub use sink::{BatchReport, BatchState, BatchStatus, Presenter, ResultStore, UiEvent};
