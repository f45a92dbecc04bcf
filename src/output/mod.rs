//! Helpers for rendering generation events for the terminal

use crate::export::ExportSummary;
use crate::input::Rejected;
use crate::sink::{BatchReport, BatchStatus, UiEvent};
use serde_json::{Value, json};

/// Combined structured and human-readable representation of an event
#[derive(Debug, Clone)]
pub struct RenderedEvent {
    /// Structured JSON representation suitable for downstream consumers
    pub json: Value,
    /// Human-readable lines for terminal presentation
    pub human: Vec<String>,
}

/// Running status line, e.g. `3/5 QR codes generated...`
pub fn progress_text(generated: usize, total: usize) -> String {
    let plural = if generated > 1 { "s" } else { "" };
    if total > 1 {
        format!("{generated}/{total} QR code{plural} generated...")
    } else {
        format!("{generated} QR code{plural} generated...")
    }
}

/// Final status line for a terminal batch status
pub fn status_text(status: &BatchStatus) -> String {
    match status {
        BatchStatus::Completed {
            generated, failed, ..
        } => {
            let plural = if *generated != 1 { "s" } else { "" };
            if *failed > 0 {
                format!("{generated} QR code{plural} generated, {failed} failed")
            } else {
                format!("{generated} QR code{plural} generated")
            }
        }
        BatchStatus::Cancelled { .. } => "Generation cancelled".to_string(),
        BatchStatus::Failed { message } => format!("Generation failed: {message}"),
    }
}

/// Render a sink event into both JSON and human-readable forms.
pub fn render_event(event: &UiEvent) -> RenderedEvent {
    match event {
        UiEvent::ItemReady(update) => RenderedEvent {
            json: json!({
                "event": "generated",
                "text": update.text,
                "index": update.index,
                "generated": update.generated,
                "total": update.total,
                "width": update.image.width(),
                "height": update.image.height(),
            }),
            human: vec![
                format!("  [{}] {}", update.index + 1, update.text),
                format!("  {}", progress_text(update.generated, update.total)),
            ],
        },
        UiEvent::ItemFailed(item) => RenderedEvent {
            json: json!({
                "event": "failed",
                "text": item.text,
                "reason": item.reason,
            }),
            human: vec![format!("  ! {}: {}", item.text, item.reason)],
        },
        UiEvent::Finished(status) => {
            let mut value = serde_json::to_value(status).unwrap_or(Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("event".to_string(), Value::String("finished".to_string()));
                obj.insert("message".to_string(), Value::String(status_text(status)));
            }
            RenderedEvent {
                json: value,
                human: vec![status_text(status)],
            }
        }
    }
}

/// Render inputs that failed validation.
pub fn render_rejected(rejected: &[Rejected]) -> RenderedEvent {
    let human = rejected
        .iter()
        .map(|r| format!("  skipped '{}': {}", r.input, r.reason))
        .collect();
    RenderedEvent {
        json: json!({
            "event": "rejected",
            "entries": rejected,
        }),
        human,
    }
}

/// Render an export summary.
pub fn render_export(summary: &ExportSummary, dir: &std::path::Path) -> RenderedEvent {
    let saved = summary.saved.len();
    let plural = if saved != 1 { "s" } else { "" };
    let mut human = vec![format!("Saved {saved} QR code{plural} to {}", dir.display())];
    for (text, error) in &summary.failures {
        human.push(format!("  ! could not save '{text}': {error}"));
    }
    RenderedEvent {
        json: json!({
            "event": "exported",
            "directory": dir.display().to_string(),
            "saved": summary.saved,
            "failures": summary.failures,
        }),
        human,
    }
}

/// Structured form of a batch report
pub fn report_value(report: &BatchReport) -> Value {
    json!({
        "batch_id": report.batch_id.to_string(),
        "state": report.state,
        "total": report.total,
        "generated": report.generated,
        "failed": report.failures.len(),
        "discarded": report.discarded,
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "error": report.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{FailedItem, ItemUpdate};
    use image::RgbaImage;
    use std::sync::Arc;

    #[test]
    fn test_progress_text() {
        assert_eq!(progress_text(1, 1), "1 QR code generated...");
        assert_eq!(progress_text(1, 5), "1/5 QR code generated...");
        assert_eq!(progress_text(3, 5), "3/5 QR codes generated...");
    }

    #[test]
    fn test_status_text() {
        let done = BatchStatus::Completed {
            generated: 1,
            failed: 0,
            total: 1,
        };
        assert_eq!(status_text(&done), "1 QR code generated");
        let partial = BatchStatus::Completed {
            generated: 0,
            failed: 2,
            total: 2,
        };
        assert_eq!(status_text(&partial), "0 QR codes generated, 2 failed");
        let cancelled = BatchStatus::Cancelled {
            delivered: 1,
            total: 3,
        };
        assert_eq!(status_text(&cancelled), "Generation cancelled");
    }

    #[test]
    fn test_render_item_event() {
        let event = UiEvent::ItemReady(ItemUpdate {
            text: "a@b.com".to_string(),
            image: Arc::new(RgbaImage::new(10, 10)),
            index: 0,
            generated: 1,
            total: 2,
        });
        let rendered = render_event(&event);
        assert_eq!(rendered.json["event"], "generated");
        assert_eq!(rendered.json["text"], "a@b.com");
        assert_eq!(rendered.json["width"], 10);
        assert_eq!(rendered.human[0], "  [1] a@b.com");
    }

    #[test]
    fn test_render_finished_event() {
        let rendered = render_event(&UiEvent::Finished(BatchStatus::Cancelled {
            delivered: 0,
            total: 4,
        }));
        assert_eq!(rendered.json["event"], "finished");
        assert_eq!(rendered.json["state"], "cancelled");
        assert_eq!(rendered.json["total"], 4);
        assert_eq!(rendered.human, vec!["Generation cancelled".to_string()]);
    }

    #[test]
    fn test_render_failed_event() {
        let rendered = render_event(&UiEvent::ItemFailed(FailedItem {
            text: "x".to_string(),
            reason: "too long".to_string(),
        }));
        assert_eq!(rendered.json["reason"], "too long");
    }
}
