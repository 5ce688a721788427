use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::TemplateId;

/// One live counter of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LedgerEntry {
    pub cloud_name: String,
    /// `None` for the cloud-wide counter.
    pub template: Option<TemplateId>,
    /// Executors of existing agents.
    pub active: u32,
    /// Executors reserved for launches that have not finished yet.
    pub pending: u32,
}

impl LedgerEntry {
    pub fn total(&self) -> u32 {
        self.active.saturating_add(self.pending)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStatistics {
    pub registration_attempts: u64,
    pub rejected_registrations: u64,
    pub releases: u64,
    pub cancellations: u64,
    /// Registrations that are being evaluated right now.
    pub concurrent_registrations: u64,
}

impl LedgerStatistics {
    pub fn successful_registrations(&self) -> u64 {
        self.registration_attempts
            .saturating_sub(self.rejected_registrations)
    }

    /// Share of admitted registrations in percent, 100 if nothing was attempted yet.
    pub fn success_rate_percentage(&self) -> u64 {
        match self.registration_attempts {
            0 => 100,
            total => self.successful_registrations() * 100 / total,
        }
    }
}

/// State of the ledger for diagnostics. Its [`Display`] output is meant for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub entries: Vec<LedgerEntry>,
    pub statistics: LedgerStatistics,
}

impl Display for LedgerSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Ledger state:")?;
        if self.entries.is_empty() {
            writeln!(f, "  nothing reserved")?;
        }
        for entry in &self.entries {
            match &entry.template {
                Some(template) => write!(f, "  {}/{template}", entry.cloud_name)?,
                None => write!(f, "  {}", entry.cloud_name)?,
            }
            writeln!(f, ": {} active, {} pending", entry.active, entry.pending)?;
        }
        let stats = &self.statistics;
        writeln!(
            f,
            "Registrations: {} attempted, {} successful, {} rejected ({}% success rate), {} in progress",
            stats.registration_attempts,
            stats.successful_registrations(),
            stats.rejected_registrations,
            stats.success_rate_percentage(),
            stats.concurrent_registrations
        )?;
        write!(
            f,
            "Releases: {}, cancelled reservations: {}",
            stats.releases, stats.cancellations
        )
    }
}
