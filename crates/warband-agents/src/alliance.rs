//! Alliance bookkeeping.
//!
//! The book keeps every alliance record ever formed. Dissolved records
//! stay so the battle block between former partners can be computed.
//! Each agent has at most one active record.

use chrono::{DateTime, Utc};
use warband_types::{AgentId, Alliance};

use crate::error::AgentError;

/// Every alliance record, in formation order.
#[derive(Debug, Clone, Default)]
pub struct AllianceBook {
    records: Vec<Alliance>,
}

impl AllianceBook {
    /// An empty book.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Seed the book from persisted records.
    pub const fn load(records: Vec<Alliance>) -> Self {
        Self { records }
    }

    /// The agent's active alliance, if any.
    pub fn active_for(&self, agent: AgentId) -> Option<&Alliance> {
        self.records
            .iter()
            .find(|a| a.is_active() && a.involves(agent))
    }

    /// Record a new active alliance.
    pub fn form(
        &mut self,
        a: AgentId,
        b: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Alliance, AgentError> {
        for id in [a, b] {
            if self.active_for(id).is_some() {
                return Err(AgentError::AllianceExists(id));
            }
        }
        let alliance = Alliance::new(a, b, now);
        self.records.push(alliance.clone());
        Ok(alliance)
    }

    /// Dissolve the agent's active alliance and return the updated record.
    pub fn dissolve_for(
        &mut self,
        agent: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Alliance, AgentError> {
        let record = self
            .records
            .iter_mut()
            .find(|a| a.is_active() && a.involves(agent))
            .ok_or(AgentError::NoActiveAlliance(agent))?;
        record.dissolve(now);
        Ok(record.clone())
    }

    /// Most recent dissolution time of an alliance between `a` and `b`.
    pub fn last_dissolved_between(&self, a: AgentId, b: AgentId) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .filter(|r| r.pairs(a, b))
            .filter_map(|r| r.dissolved_at)
            .max()
    }

    /// All records.
    pub fn records(&self) -> &[Alliance] {
        &self.records
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn second_active_alliance_is_refused() {
        let mut book = AllianceBook::new();
        book.form(AgentId(1), AgentId(2), t0()).unwrap();
        assert!(matches!(
            book.form(AgentId(1), AgentId(3), t0()),
            Err(AgentError::AllianceExists(AgentId(1)))
        ));
        assert!(matches!(
            book.form(AgentId(3), AgentId(2), t0()),
            Err(AgentError::AllianceExists(AgentId(2)))
        ));
    }

    #[test]
    fn active_record_is_symmetric() {
        let mut book = AllianceBook::new();
        book.form(AgentId(5), AgentId(2), t0()).unwrap();
        let from_a = book.active_for(AgentId(5)).unwrap();
        let from_b = book.active_for(AgentId(2)).unwrap();
        assert_eq!(from_a.id, from_b.id);
        assert_eq!(from_a.partner_of(AgentId(5)), Some(AgentId(2)));
        assert_eq!(from_b.partner_of(AgentId(2)), Some(AgentId(5)));
    }

    #[test]
    fn dissolution_keeps_history() {
        let mut book = AllianceBook::new();
        book.form(AgentId(1), AgentId(2), t0()).unwrap();
        let later = t0() + TimeDelta::hours(3);
        let record = book.dissolve_for(AgentId(2), later).unwrap();
        assert!(!record.is_active());
        assert!(book.active_for(AgentId(1)).is_none());
        assert_eq!(book.records().len(), 1);
        assert_eq!(book.last_dissolved_between(AgentId(2), AgentId(1)), Some(later));
        book.form(AgentId(1), AgentId(3), later).unwrap();
        assert_eq!(book.records().len(), 2);
    }

    #[test]
    fn dissolving_without_alliance_fails() {
        let mut book = AllianceBook::new();
        assert!(matches!(
            book.dissolve_for(AgentId(9), t0()),
            Err(AgentError::NoActiveAlliance(AgentId(9)))
        ));
    }
}
