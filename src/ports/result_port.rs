//! Result store port trait.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::output::{AnalyzerPosition, AnalyzerReturn};

pub trait ResultPort {
    /// Latest timestamp in `analyzer_positions`, `None` when empty.
    fn last_position_time(&self, tournament: Option<&str>) -> Result<Option<Timestamp>, AnalyzerError>;

    /// Deletes every row with `timestamp >= min_update_time` from both tables
    /// and inserts the given rows. Either everything is applied or nothing is.
    fn replace_window(
        &self,
        min_update_time: Timestamp,
        tournament: Option<&str>,
        positions: &[AnalyzerPosition],
        returns: &[AnalyzerReturn],
    ) -> Result<(), AnalyzerError>;

    /// Storage maintenance before a run.
    fn vacuum(&self) -> Result<(), AnalyzerError> {
        Ok(())
    }
}
