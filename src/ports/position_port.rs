//! Upstream position source port trait.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::position::PositionRecord;

pub trait PositionPort {
    /// Rows at or after `min_timestamp` (all rows when `None`), optionally
    /// restricted to one tournament.
    fn get_positions(
        &self,
        tournament: Option<&str>,
        min_timestamp: Option<Timestamp>,
    ) -> Result<Vec<PositionRecord>, AnalyzerError>;
}
