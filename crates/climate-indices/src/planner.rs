//! Temporal chunk planning.

use chrono::NaiveDate;
use grid_store::time::{year_end, year_start, DAYS_IN_LEAP_YEAR};
use grid_store::GridCoordinates;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};

/// An inclusive range of whole years processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalChunk {
    pub start_year: i32,
    pub end_year: i32,
}

impl TemporalChunk {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
        }
    }

    /// Number of years in the chunk.
    pub fn years(&self) -> usize {
        (self.end_year - self.start_year + 1) as usize
    }

    /// File name of the chunk's partial result archive.
    pub fn artifact_name(&self) -> String {
        format!("indices_{}_{}.zarr", self.start_year, self.end_year)
    }

    /// January 1 of the first year.
    pub fn start_date(&self) -> Result<NaiveDate> {
        Ok(year_start(self.start_year)?)
    }

    /// December 31 of the last year.
    pub fn end_date(&self) -> Result<NaiveDate> {
        Ok(year_end(self.end_year)?)
    }
}

impl std::fmt::Display for TemporalChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_year, self.end_year)
    }
}

/// Split `start_year..=end_year` into contiguous chunks of `chunk_years`.
///
/// The final chunk is truncated at `end_year`.
pub fn plan_chunks(start_year: i32, end_year: i32, chunk_years: usize) -> Result<Vec<TemporalChunk>> {
    if chunk_years == 0 {
        return Err(EngineError::config("chunk_years must be at least 1"));
    }
    if start_year > end_year {
        return Err(EngineError::config(format!(
            "start year {start_year} is after end year {end_year}"
        )));
    }

    let step = chunk_years.min(i32::MAX as usize) as i64;
    let mut chunks = Vec::new();
    let mut start = start_year as i64;
    while start <= end_year as i64 {
        let end = (start + step - 1).min(end_year as i64);
        chunks.push(TemporalChunk::new(start as i32, end as i32));
        start = end + 1;
    }
    Ok(chunks)
}

/// Memory ceiling for the input variables of one chunk.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudget {
    limit_bytes: u64,
}

impl MemoryBudget {
    pub fn new(limit_bytes: u64) -> Self {
        Self { limit_bytes }
    }

    /// Bytes one year of `variables` inputs occupies on `grid`.
    pub fn bytes_per_year(grid: &GridCoordinates, variables: usize) -> u64 {
        DAYS_IN_LEAP_YEAR as u64 * grid.len() as u64 * 4 * variables.max(1) as u64
    }

    /// Largest chunk length that fits the ceiling, never below one year.
    pub fn max_chunk_years(&self, grid: &GridCoordinates, variables: usize) -> usize {
        let per_year = Self::bytes_per_year(grid, variables).max(1);
        ((self.limit_bytes / per_year) as usize).max(1)
    }

    /// Clamp a configured chunk length to the ceiling.
    pub fn clamp(&self, chunk_years: usize, grid: &GridCoordinates, variables: usize) -> usize {
        let max = self.max_chunk_years(grid, variables);
        if chunk_years > max {
            warn!(
                configured = chunk_years,
                clamped = max,
                cells = grid.len(),
                variables,
                "Chunk length exceeds memory ceiling, clamping"
            );
            max
        } else {
            chunk_years
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n_lat: usize, n_lon: usize) -> GridCoordinates {
        GridCoordinates::new(
            (0..n_lat).map(|i| i as f64).collect(),
            (0..n_lon).map(|i| i as f64).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_plan_examples() {
        let chunks = plan_chunks(1981, 2024, 10).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], TemporalChunk::new(1981, 1990));
        assert_eq!(chunks[4], TemporalChunk::new(2021, 2024));

        assert_eq!(
            plan_chunks(2000, 2002, 50).unwrap(),
            vec![TemporalChunk::new(2000, 2002)]
        );
        assert_eq!(
            plan_chunks(2000, 2000, 1).unwrap(),
            vec![TemporalChunk::new(2000, 2000)]
        );
    }

    #[test]
    fn test_plan_errors() {
        assert!(matches!(
            plan_chunks(2000, 2010, 0),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            plan_chunks(2010, 2000, 5),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_plan_coverage_exhaustive() {
        for start in 1950..1970 {
            for end in start..start + 45 {
                for chunk_years in 1..50 {
                    let chunks = plan_chunks(start, end, chunk_years).unwrap();
                    assert_eq!(chunks.first().unwrap().start_year, start);
                    assert_eq!(chunks.last().unwrap().end_year, end);
                    for pair in chunks.windows(2) {
                        assert_eq!(pair[0].end_year + 1, pair[1].start_year);
                    }
                    for (i, c) in chunks.iter().enumerate() {
                        assert!(c.start_year <= c.end_year);
                        if i + 1 < chunks.len() {
                            assert_eq!(c.years(), chunk_years);
                        } else {
                            assert!(c.years() <= chunk_years);
                        }
                    }
                    let total: usize = chunks.iter().map(|c| c.years()).sum();
                    assert_eq!(total, (end - start + 1) as usize);
                }
            }
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            TemporalChunk::new(1981, 1990).artifact_name(),
            "indices_1981_1990.zarr"
        );
    }

    #[test]
    fn test_memory_budget() {
        let g = grid(100, 100);
        let per_year = MemoryBudget::bytes_per_year(&g, 3);
        assert_eq!(per_year, 366 * 10_000 * 4 * 3);

        let budget = MemoryBudget::new(per_year * 4 + 1);
        assert_eq!(budget.max_chunk_years(&g, 3), 4);
        assert_eq!(budget.clamp(10, &g, 3), 4);
        assert_eq!(budget.clamp(2, &g, 3), 2);

        // Never below one year.
        let tiny = MemoryBudget::new(1);
        assert_eq!(tiny.max_chunk_years(&g, 3), 1);
    }
}
