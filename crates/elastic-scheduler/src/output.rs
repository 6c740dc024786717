//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use clap::ValueEnum;
use elastic_scaling::{ExecutionHistory, TickReport};
use serde::Serialize;

use crate::error::{Result, SchedulerError};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<()>;
}

/// Write a value in the selected format.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write<W, T>(writer: &mut W, format: Format, value: &T) -> Result<()>
where
    W: Write,
    T: Serialize + TableDisplay,
{
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *writer, value)
                .map_err(|e| SchedulerError::Output(format!("JSON serialization failed: {e}")))?;
            writeln!(writer)?;
        }
        Format::Table => value.write_table(writer)?,
    }
    Ok(())
}

impl TableDisplay for TickReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(
            writer,
            "Evaluated: {}  Locked elsewhere: {}  Failed: {}  Orders: {}",
            self.evaluated,
            self.skipped_locked,
            self.failed,
            self.orders_created()
        )?;
        let unrecorded = self.history_failures();
        if unrecorded > 0 {
            writeln!(writer, "Warning: {unrecorded} outcome(s) missing from execution history")?;
        }
        if self.outcomes.is_empty() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "{:>8}  {:>8}  {:<16}  {:<36}  {:>6}  {:>7}  REASON",
            "STRATEGY", "CLUSTER", "RESOURCE TYPE", "RESULT", "ORDER", "DEVICES"
        )?;
        writeln!(writer, "{}", "─".repeat(110))?;
        for outcome in &self.outcomes {
            writeln!(
                writer,
                "{:>8}  {:>8}  {:<16}  {:<36}  {:>6}  {:>7}  {}",
                outcome.strategy_id.get(),
                outcome.cluster_id.get(),
                truncate(outcome.resource_type.as_str(), 16),
                outcome.result.as_str(),
                outcome.order_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                outcome.device_count,
                outcome.reason
            )?;
        }
        Ok(())
    }
}

/// History rows for display, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryList {
    /// Rows.
    pub rows: Vec<ExecutionHistory>,
}

impl TableDisplay for HistoryList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.rows.is_empty() {
            writeln!(writer, "No execution history")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:>6}  {:<20}  {:>8}  {:>8}  {:<16}  {:<36}  {:>6}  REASON",
            "ID", "TIME", "STRATEGY", "CLUSTER", "RESOURCE TYPE", "RESULT", "ORDER"
        )?;
        writeln!(writer, "{}", "─".repeat(120))?;
        for row in &self.rows {
            let entry = &row.entry;
            writeln!(
                writer,
                "{:>6}  {:<20}  {:>8}  {:>8}  {:<16}  {:<36}  {:>6}  {}",
                row.id.get(),
                entry.execution_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                entry.strategy_id.get(),
                entry.cluster_id.get(),
                truncate(entry.resource_type.as_str(), 16),
                entry.result.as_str(),
                entry.order_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                entry.reason
            )?;
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} row(s)", self.rows.len())?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
