//! qrbatch command-line entrypoint

use clap::Parser;
use qrbatch::export::{self, ExportSummary};
use qrbatch::output::{
    RenderedEvent, render_event, render_export, render_rejected, report_value,
};
use qrbatch::sink::ChannelPresenter;
use qrbatch::{BatchReport, BatchState, Error, Generator, QrBatchConfig, QrColor, Result, input, logging};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Exit status used when the user interrupts generation
const EXIT_CANCELLED: u8 = 130;
/// Padding between codes on the contact sheet
const SHEET_PADDING: u32 = 20;

#[derive(Parser, Debug)]
#[command(
    name = "qrbatch",
    version,
    about = "Generate QR codes for email addresses and URLs"
)]
struct Cli {
    /// Email addresses or URLs. Separate several with `;`; use `-` to read stdin.
    #[arg(value_name = "ENTRY")]
    inputs: Vec<String>,

    /// Read entries from a file (one or more per line, `;`-separated)
    #[arg(long, value_name = "PATH")]
    file: Vec<PathBuf>,

    /// Optional configuration file (toml/yaml). Defaults to qrbatch.{toml,yaml} in cwd/XDG config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory PNG files are written to
    #[arg(long, short = 'o', value_name = "DIR")]
    out: Option<PathBuf>,

    /// Also write every code into a single grid image
    #[arg(long, value_name = "PATH")]
    sheet: Option<PathBuf>,

    /// Dark module colour, e.g. #004354
    #[arg(long, value_name = "HEX")]
    color: Option<String>,

    /// Logo stamped in the centre of every code
    #[arg(long, value_name = "PATH", conflicts_with = "no_logo")]
    logo: Option<PathBuf>,

    /// Ignore any logo from the configuration file
    #[arg(long)]
    no_logo: bool,

    /// Error-correction level (L, M, Q, H)
    #[arg(long, value_name = "LEVEL")]
    ecc: Option<String>,

    /// Number of worker threads (defaults to the CPU count)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Decode each code back and report the ones that do not round-trip
    #[arg(long)]
    verify: bool,

    /// Output results as JSON lines instead of human-readable text
    #[arg(long)]
    json: bool,

    /// Generate only; do not write PNG files
    #[arg(long)]
    no_export: bool,
}

#[derive(Clone, Copy)]
struct OutputSinks {
    json: bool,
}

/// How the export step ended
#[derive(Debug, PartialEq, Eq)]
enum ExportOutcome {
    Finished,
    Interrupted,
}

impl OutputSinks {
    fn emit(&self, rendered: &RenderedEvent) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&rendered.json)?);
        } else {
            for line in &rendered.human {
                println!("{line}");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = QrBatchConfig::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli)?;
    logging::init(&config.logging)?;

    let sinks = OutputSinks { json: cli.json };

    let raw = collect_raw_input(&cli)?;
    let prepared = input::prepare(&raw);
    if !prepared.rejected.is_empty() {
        sinks.emit(&render_rejected(&prepared.rejected))?;
    }
    if prepared.is_empty() {
        return Err(Error::Other(
            "No valid entry found. Enter at least one email address or URL.".to_string(),
        ));
    }
    info!(
        items = prepared.items.len(),
        rejected = prepared.rejected.len(),
        duplicates = prepared.duplicates,
        "Prepared input"
    );

    let mut generator = Generator::from_config(&config)?;
    let report = generate(&mut generator, prepared.items, &sinks).await?;

    if sinks.json {
        println!("{}", serde_json::to_string(&report_value(&report))?);
    }

    match report.state {
        BatchState::Completed => {
            if cli.no_export {
                return Ok(ExitCode::SUCCESS);
            }
            let interrupt = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            match export_until_interrupted(generator, config, sinks, interrupt).await? {
                ExportOutcome::Finished => Ok(ExitCode::SUCCESS),
                ExportOutcome::Interrupted => {
                    info!("Export interrupted");
                    // The blocking export cannot be stopped; leave without waiting for it.
                    std::process::exit(i32::from(EXIT_CANCELLED));
                }
            }
        }
        BatchState::Cancelled => Ok(ExitCode::from(EXIT_CANCELLED)),
        _ => Err(Error::Unexpected(
            report
                .error
                .unwrap_or_else(|| "generation failed".to_string()),
        )),
    }
}

fn apply_cli_overrides(config: &mut QrBatchConfig, cli: &Cli) -> Result<()> {
    if let Some(ref color) = cli.color {
        // Validate early so a typo fails before any work starts
        config.render.dark_color = QrColor::parse(color)?.to_string();
    }
    if let Some(ref ecc) = cli.ecc {
        config.render.ecc_level = ecc.clone();
    }
    if let Some(ref logo) = cli.logo {
        config.render.logo = Some(logo.clone());
    }
    if cli.no_logo {
        config.render.logo = None;
    }
    if cli.verify {
        config.render.verify = true;
    }
    if let Some(workers) = cli.workers {
        config.pipeline.workers = Some(workers.max(1));
    }
    if let Some(ref out) = cli.out {
        config.export.directory = out.clone();
    }
    if let Some(ref sheet) = cli.sheet {
        config.export.sheet = Some(sheet.clone());
    }
    Ok(())
}

fn collect_raw_input(cli: &Cli) -> Result<String> {
    let mut raw = String::new();
    for entry in &cli.inputs {
        if entry == "-" {
            std::io::stdin().read_to_string(&mut raw)?;
        } else {
            raw.push_str(entry);
        }
        raw.push('\n');
    }
    for path in &cli.file {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {}: {e}", path.display()),
            ))
        })?;
        raw.push_str(&contents);
        raw.push('\n');
    }
    Ok(raw)
}

async fn generate(
    generator: &mut Generator,
    items: Vec<qrbatch::WorkItem>,
    sinks: &OutputSinks,
) -> Result<BatchReport> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let running = generator.start(items, ChannelPresenter::new(tx))?;

    let token = running.token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    // The channel closes when the sink thread drops its presenter.
    while let Some(event) = rx.recv().await {
        sinks.emit(&render_event(&event))?;
    }
    interrupt.abort();

    tokio::task::block_in_place(|| running.wait())
}

/// Run the export on the blocking pool, giving up as soon as `interrupt` resolves.
async fn export_until_interrupted<I>(
    generator: Generator,
    config: QrBatchConfig,
    sinks: OutputSinks,
    interrupt: I,
) -> Result<ExportOutcome>
where
    I: Future<Output = ()>,
{
    let export = tokio::task::spawn_blocking(move || export_results(&generator, &config, &sinks));
    tokio::select! {
        biased;
        () = interrupt => Ok(ExportOutcome::Interrupted),
        joined = export => {
            joined.map_err(|e| Error::Unexpected(format!("export task failed: {e}")))??;
            Ok(ExportOutcome::Finished)
        }
    }
}

fn export_results(generator: &Generator, config: &QrBatchConfig, sinks: &OutputSinks) -> Result<()> {
    let store = generator.store();
    if store.is_empty() {
        return Ok(());
    }

    let dir = &config.export.directory;
    let summary: ExportSummary = export::export_store(store, dir, config.export.max_name_len)?;
    sinks.emit(&render_export(&summary, dir))?;

    if let Some(ref sheet) = config.export.sheet {
        let background = QrColor::parse(&config.render.light_color)?;
        if export::save_sheet(store, sheet, SHEET_PADDING, background)? && !sinks.json {
            println!("Contact sheet written to {}", sheet.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrbatch::QrEncoder;
    use std::sync::Arc;

    fn idle_generator() -> Generator {
        Generator::with_encoder(Arc::new(QrEncoder::default()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn export_stops_waiting_on_interrupt() {
        let outcome = export_until_interrupted(
            idle_generator(),
            QrBatchConfig::default(),
            OutputSinks { json: true },
            std::future::ready(()),
        )
        .await
        .expect("export outcome");
        assert_eq!(outcome, ExportOutcome::Interrupted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn export_finishes_without_interrupt() {
        let outcome = export_until_interrupted(
            idle_generator(),
            QrBatchConfig::default(),
            OutputSinks { json: true },
            std::future::pending(),
        )
        .await
        .expect("export outcome");
        assert_eq!(outcome, ExportOutcome::Finished);
    }

    #[test]
    fn cli_overrides_reach_config() {
        let cli = Cli::parse_from(["qrbatch", "--workers", "0", "--no-logo", "--ecc", "m", "a@b.com"]);
        let mut config = QrBatchConfig::default();
        config.render.logo = Some(PathBuf::from("logo.png"));
        apply_cli_overrides(&mut config, &cli).expect("overrides apply");
        assert_eq!(config.pipeline.workers, Some(1));
        assert!(config.render.logo.is_none());
        assert_eq!(config.render.ecc_level, "m");
    }
}
