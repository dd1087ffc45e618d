// 📊 Reporting sinks - text, JSON, CSV
//
// Presentation only; the orchestrator hands over a finished BenchmarkReport.

use crate::bench::BenchmarkReport;
use crate::timing::duration_ms;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn sink(&self) -> Box<dyn ReportSink> {
        match self {
            ReportFormat::Text => Box::new(TextReport),
            ReportFormat::Json => Box::new(JsonReport),
            ReportFormat::Csv => Box::new(CsvReport),
        }
    }
}

pub trait ReportSink {
    fn write_report(&self, report: &BenchmarkReport, out: &mut dyn Write) -> io::Result<()>;
}

// ============================================================================
// TEXT
// ============================================================================

pub struct TextReport;

impl ReportSink for TextReport {
    fn write_report(&self, report: &BenchmarkReport, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Run {} ({} reconciler)", report.run_id, report.reconciler)?;
        writeln!(
            out,
            "Sample: {} keys, fingerprint {}",
            report.sample_size,
            report.sample_fingerprint.get(..16).unwrap_or(report.sample_fingerprint.as_str())
        )?;
        if let Some(warmup) = &report.warmup {
            writeln!(out, "Warmup: {} (not measured)", warmup)?;
        }

        for result in &report.results {
            writeln!(out)?;
            writeln!(out, "Strategy {}", result.label)?;

            let count = result.trials.len();
            for (i, timing) in result.trials.iter().enumerate() {
                write!(
                    out,
                    "  Trial {} of {}: load {:.3} ms, match {:.3} ms, extract {:.3} ms, total {:.3} ms",
                    i + 1,
                    report.trials_per_config,
                    duration_ms(timing.load),
                    duration_ms(timing.matching),
                    duration_ms(timing.extract),
                    duration_ms(timing.total())
                )?;
                write_index_build(out, result.index_build_ms.get(i).copied())?;
            }

            let avg = &result.aggregate;
            write!(
                out,
                "  Avg over {}: load {:.3} ms, match {:.3} ms, extract {:.3} ms, total {:.3} ms",
                count, avg.load_ms, avg.match_ms, avg.extract_ms, avg.total_ms
            )?;
            write_index_build(out, result.index_build_mean_ms)?;

            if let Some(failure) = &result.failure {
                writeln!(out, "  FAILED at trial {}: {}", failure.trial, failure.message)?;
            }
        }

        Ok(())
    }
}

// Index build is reported beside the phases, never inside total
fn write_index_build(out: &mut dyn Write, index_ms: Option<f64>) -> io::Result<()> {
    match index_ms {
        Some(ms) => writeln!(out, " (index build {:.3} ms)", ms),
        None => writeln!(out),
    }
}

// ============================================================================
// JSON
// ============================================================================

pub struct JsonReport;

impl ReportSink for JsonReport {
    fn write_report(&self, report: &BenchmarkReport, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)
    }
}

// ============================================================================
// CSV
// ============================================================================

/// One row per trial plus one `avg` row per strategy
pub struct CsvReport;

#[derive(Serialize)]
struct CsvRow<'a> {
    run_id: String,
    strategy: &'a str,
    trial: String,
    load_ms: f64,
    match_ms: f64,
    extract_ms: f64,
    total_ms: f64,
    index_build_ms: Option<f64>,
}

impl ReportSink for CsvReport {
    fn write_report(&self, report: &BenchmarkReport, out: &mut dyn Write) -> io::Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        let run_id = report.run_id.to_string();

        for result in &report.results {
            for (i, timing) in result.trials.iter().enumerate() {
                writer.serialize(CsvRow {
                    run_id: run_id.clone(),
                    strategy: &result.label,
                    trial: (i + 1).to_string(),
                    load_ms: duration_ms(timing.load),
                    match_ms: duration_ms(timing.matching),
                    extract_ms: duration_ms(timing.extract),
                    total_ms: duration_ms(timing.total()),
                    index_build_ms: result.index_build_ms.get(i).copied(),
                })?;
            }

            let avg = &result.aggregate;
            writer.serialize(CsvRow {
                run_id: run_id.clone(),
                strategy: &result.label,
                trial: "avg".to_string(),
                load_ms: avg.load_ms,
                match_ms: avg.match_ms,
                extract_ms: avg.extract_ms,
                total_ms: avg.total_ms,
                index_build_ms: result.index_build_mean_ms,
            })?;
        }

        writer.flush()
    }
}

// ============================================================================
// TESTS
// ============================================================================
