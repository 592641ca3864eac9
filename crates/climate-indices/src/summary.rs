//! Run summaries.

use std::path::PathBuf;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};

use crate::planner::TemporalChunk;

/// Final state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub chunk: TemporalChunk,
    pub status: ChunkStatus,
    pub artifact: PathBuf,
    pub indices_expected: Vec<String>,
    pub indices_produced: Vec<String>,
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

impl ChunkReport {
    /// Expected indices the chunk did not produce.
    pub fn missing_indices(&self) -> Vec<String> {
        self.indices_expected
            .iter()
            .filter(|i| !self.indices_produced.contains(i))
            .cloned()
            .collect()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub chunks: Vec<ChunkReport>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn count(&self, status: ChunkStatus) -> usize {
        self.chunks.iter().filter(|c| c.status == status).count()
    }

    /// Index results expected across all chunks.
    pub fn total_expected(&self) -> usize {
        self.chunks.iter().map(|c| c.indices_expected.len()).sum()
    }

    /// Index results found across all chunks.
    pub fn total_found(&self) -> usize {
        self.chunks.iter().map(|c| c.indices_produced.len()).sum()
    }

    /// True when every chunk completed or was already present.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self
                .chunks
                .iter()
                .all(|c| matches!(c.status, ChunkStatus::Completed | ChunkStatus::Skipped))
    }

    /// Format the summary as a console table.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Chunk", "Status", "Indices", "Missing", "Time", "Error"]);

        for report in &self.chunks {
            let missing = report.missing_indices();
            table.add_row(vec![
                report.chunk.to_string(),
                report.status.as_str().to_string(),
                format!(
                    "{}/{}",
                    report.indices_produced.len(),
                    report.indices_expected.len()
                ),
                if missing.is_empty() {
                    "-".to_string()
                } else {
                    missing.join(", ")
                },
                format!("{:.1}s", report.elapsed_secs),
                report.error.clone().unwrap_or_default(),
            ]);
        }

        table.add_row(vec![
            "Total".to_string(),
            format!(
                "{} ok / {} skipped / {} failed",
                self.count(ChunkStatus::Completed),
                self.count(ChunkStatus::Skipped),
                self.count(ChunkStatus::Failed)
            ),
            format!("{}/{}", self.total_found(), self.total_expected()),
            String::new(),
            String::new(),
            if self.cancelled {
                "cancelled".to_string()
            } else {
                String::new()
            },
        ]);

        table.to_string()
    }

    /// Format the summary as JSON.
    pub fn format_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: ChunkStatus, produced: &[&str]) -> ChunkReport {
        ChunkReport {
            chunk: TemporalChunk::new(2001, 2002),
            status,
            artifact: PathBuf::from("/out/indices_2001_2002.zarr"),
            indices_expected: vec!["txx".to_string(), "summer_days".to_string()],
            indices_produced: produced.iter().map(|s| s.to_string()).collect(),
            error: None,
            elapsed_secs: 1.25,
        }
    }

    #[test]
    fn test_totals_and_missing() {
        let summary = RunSummary {
            chunks: vec![
                report(ChunkStatus::Completed, &["txx", "summer_days"]),
                report(ChunkStatus::Completed, &["txx"]),
            ],
            cancelled: false,
        };
        assert_eq!(summary.total_expected(), 4);
        assert_eq!(summary.total_found(), 3);
        assert_eq!(summary.chunks[1].missing_indices(), vec!["summer_days"]);
        assert!(summary.is_success());
    }

    #[test]
    fn test_failure_and_cancel_are_not_success() {
        let failed = RunSummary {
            chunks: vec![report(ChunkStatus::Failed, &[])],
            cancelled: false,
        };
        assert!(!failed.is_success());

        let cancelled = RunSummary {
            chunks: vec![report(ChunkStatus::Completed, &["txx", "summer_days"])],
            cancelled: true,
        };
        assert!(!cancelled.is_success());
    }

    #[test]
    fn test_formats() {
        let summary = RunSummary {
            chunks: vec![report(ChunkStatus::Skipped, &["txx"])],
            cancelled: false,
        };
        let table = summary.format_table();
        assert!(table.contains("2001-2002"));
        assert!(table.contains("skipped"));
        assert!(table.contains("summer_days"));

        let json = summary.format_json().unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunks[0].status, ChunkStatus::Skipped);
    }
}
