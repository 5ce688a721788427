use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::ledger::Ledger;
use crate::TemplateId;

/// Executors reserved in a [`Ledger`].
///
/// The executors are released when the reservation is dropped, unless it was
/// [confirmed](Reservation::confirm) first.
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation {
    ledger: Arc<Ledger>,
    cloud_name: String,
    template: Option<TemplateId>,
    executors: u32,
    // Reservations of clouds without limits were never counted
    tracked: bool,
}

impl Reservation {
    pub(super) fn new(
        ledger: Arc<Ledger>,
        cloud_name: String,
        template: Option<TemplateId>,
        executors: u32,
        tracked: bool,
    ) -> Self {
        Self {
            ledger,
            cloud_name,
            template,
            executors,
            tracked,
        }
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    pub fn template(&self) -> Option<&TemplateId> {
        self.template.as_ref()
    }

    pub fn executors(&self) -> u32 {
        self.executors
    }

    /// Moves up to `executors` of this reservation into a new one.
    pub fn split_off(&mut self, executors: u32) -> Reservation {
        let taken = executors.min(self.executors);
        self.executors -= taken;
        Reservation {
            ledger: self.ledger.clone(),
            cloud_name: self.cloud_name.clone(),
            template: self.template.clone(),
            executors: taken,
            tracked: self.tracked,
        }
    }

    /// Takes over the executors of another reservation of the same cloud and template.
    pub fn merge(&mut self, mut other: Reservation) {
        debug_assert_eq!(self.cloud_name, other.cloud_name);
        debug_assert_eq!(self.template, other.template);
        self.executors = self.executors.saturating_add(other.executors);
        self.tracked |= other.tracked;
        other.executors = 0;
    }

    /// The reserved executors now belong to a live agent.
    ///
    /// They are moved from pending to active and stay counted until the agent is deleted and
    /// released through [`Ledger::release_for_agent`].
    pub fn confirm(mut self) {
        if self.tracked {
            self.ledger
                .confirm_by_name(&self.cloud_name, self.template.as_ref(), self.executors);
        }
        self.executors = 0;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.tracked && self.executors > 0 {
            self.ledger
                .cancel_by_name(&self.cloud_name, self.template.as_ref(), self.executors);
        }
    }
}

impl Debug for Reservation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("cloud_name", &self.cloud_name)
            .field("template", &self.template)
            .field("executors", &self.executors)
            .finish()
    }
}
