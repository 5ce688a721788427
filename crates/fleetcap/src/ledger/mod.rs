//! Accounting of executors reserved from clouds.
//!
//! The ledger keeps one counter per cloud and one per `(cloud, template)` pair, split into executors
//! of live agents (active) and executors of launches that are still in flight (pending). A
//! reservation is admitted only if both counters stay within the caps of the cloud after the
//! increment, pending executors included; the check and the increment happen under a single lock
//! per cloud, so concurrent reservations against the same cloud can never overshoot its caps
//! together.
//!
//! Counts are kept by cloud name. Names are not guaranteed to be unique, so two clouds with the
//! same name share their counters.
mod naming;
mod reservation;
mod summary;

pub use naming::{AgentOwner, resolve_owner};
pub use reservation::Reservation;
pub use summary::{LedgerEntry, LedgerStatistics, LedgerSummary};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agent::Agent;
use crate::cloud::{Cloud, CloudRef};
use crate::{Map, TemplateId};

#[derive(Default, Clone)]
struct Counts {
    global: u32,
    templates: Map<TemplateId, u32>,
}

impl Counts {
    fn is_empty(&self) -> bool {
        self.global == 0 && self.templates.is_empty()
    }

    fn template(&self, template: &TemplateId) -> u32 {
        self.templates.get(template).copied().unwrap_or(0)
    }

    fn add(&mut self, template: Option<&TemplateId>, count: u32) {
        self.global = self.global.saturating_add(count);
        if let Some(template) = template {
            let entry = self.templates.entry(template.clone()).or_insert(0);
            *entry = entry.saturating_add(count);
        }
    }

    fn remove(&mut self, template: Option<&TemplateId>, count: u32) {
        self.global = self.global.saturating_sub(count);
        if let Some(template) = template {
            if let Some(entry) = self.templates.get_mut(template) {
                *entry = entry.saturating_sub(count);
                if *entry == 0 {
                    self.templates.remove(template);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    /// Executors of agents that exist.
    Active,
    /// Executors reserved for launches that have not finished yet.
    Pending,
}

#[derive(Default)]
struct CloudEntries {
    active: Counts,
    pending: Counts,
}

impl CloudEntries {
    fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    fn global(&self) -> u32 {
        self.active.global.saturating_add(self.pending.global)
    }

    fn template(&self, template: &TemplateId) -> u32 {
        self.active
            .template(template)
            .saturating_add(self.pending.template(template))
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Counts {
        match bucket {
            Bucket::Active => &mut self.active,
            Bucket::Pending => &mut self.pending,
        }
    }
}

type CloudSlot = Arc<Mutex<CloudEntries>>;

fn lock_slot(slot: &CloudSlot) -> MutexGuard<'_, CloudEntries> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Counters {
    registration_attempts: AtomicU64,
    rejected_registrations: AtomicU64,
    releases: AtomicU64,
    cancellations: AtomicU64,
    concurrent_registrations: AtomicU64,
}

#[derive(Default)]
pub struct Ledger {
    // Slots are shared out under this lock and only dropped from the map when nobody else holds
    // them, so a counter can never be updated in a slot that is no longer reachable.
    clouds: Mutex<Map<String, CloudSlot>>,
    counters: Counters,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to count `count` executors of `cloud` (optionally of `template`) as in use.
    ///
    /// Returns false without changing anything if the executors would exceed the global cap or
    /// the template cap of the cloud. Clouds without limits always succeed and nothing is recorded.
    pub fn register(&self, cloud: &dyn Cloud, template: Option<&TemplateId>, count: u32) -> bool {
        self.admit(cloud, template, count, Bucket::Active)
    }

    /// Returns `count` executors of `cloud` (optionally of `template`) that were in use.
    ///
    /// Counters never go below zero. Does nothing for clouds without limits.
    pub fn release(&self, cloud: &dyn Cloud, template: Option<&TemplateId>, count: u32) {
        if cloud.supports_limits() {
            self.release_by_name(cloud.name(), template, count);
        }
    }

    /// Reserves capacity for a launch that has not finished yet.
    ///
    /// Admission is the same as for [`Ledger::register`], but the executors are counted as pending
    /// until the returned guard is confirmed. Dropping the guard cancels the reservation.
    pub fn reserve(
        self: &Arc<Self>,
        cloud: &dyn Cloud,
        template: Option<TemplateId>,
        count: u32,
    ) -> Option<Reservation> {
        if !self.admit(cloud, template.as_ref(), count, Bucket::Pending) {
            return None;
        }
        Some(Reservation::new(
            self.clone(),
            cloud.name().to_string(),
            template,
            count,
            cloud.supports_limits(),
        ))
    }

    /// Number of executors counted against the caps of the cloud, pending ones included.
    pub fn cloud_count(&self, cloud_name: &str) -> u32 {
        self.read_slot(cloud_name, |entries| entries.global())
    }

    /// Number of executors counted against the cap of `template`, pending ones included.
    pub fn template_count(&self, cloud_name: &str, template: &TemplateId) -> u32 {
        self.read_slot(cloud_name, |entries| entries.template(template))
    }

    /// Number of executors of the cloud that are reserved for unfinished launches.
    pub fn pending_cloud_count(&self, cloud_name: &str) -> u32 {
        self.read_slot(cloud_name, |entries| entries.pending.global)
    }

    pub fn pending_template_count(&self, cloud_name: &str, template: &TemplateId) -> u32 {
        self.read_slot(cloud_name, |entries| entries.pending.template(template))
    }

    /// How many executors could be reserved right now. `None` means that there is no bound.
    ///
    /// Only a hint, another reservation can take the capacity before it is registered.
    pub fn headroom(&self, cloud: &dyn Cloud, template: Option<&TemplateId>) -> Option<u32> {
        let limits = cloud.limits();
        if !limits.is_limited() {
            return None;
        }
        let (global, template_count) = match self.get_slot(cloud.name()) {
            Some(slot) => {
                let entries = lock_slot(&slot);
                (
                    entries.global(),
                    template.map(|t| entries.template(t)).unwrap_or(0),
                )
            }
            None => (0, 0),
        };
        let global = limits.global_cap().headroom(global);
        let template = template.and_then(|t| limits.template_cap(t).headroom(template_count));
        match (global, template) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Rebuilds the active counters from the agents that currently exist.
    ///
    /// Agents that cannot be matched to any cloud, or that belong to a cloud without limits, are
    /// not counted. Pending reservations are kept, their launches are still in flight.
    pub fn reinitialize(&self, clouds: &[CloudRef], agents: &[Agent]) {
        let mut rebuilt: Map<String, Counts> = Default::default();
        for agent in agents {
            let Some(owner) = resolve_owner(clouds, agent) else {
                continue;
            };
            if !owner.cloud.supports_limits() {
                continue;
            }
            log::debug!(
                "Counting {} executor(s) of agent {} in cloud {} (template {:?})",
                agent.num_executors(),
                agent.name(),
                owner.cloud.name(),
                owner.template
            );
            rebuilt
                .entry(owner.cloud.name().to_string())
                .or_default()
                .add(owner.template.as_ref(), agent.num_executors());
        }

        let mut slots = self.lock_clouds();
        for (name, slot) in slots.iter() {
            let mut entries = lock_slot(slot);
            entries.active = rebuilt.remove(name).unwrap_or_default();
        }
        for (name, active) in rebuilt {
            let entries = CloudEntries {
                active,
                pending: Counts::default(),
            };
            slots.insert(name, Arc::new(Mutex::new(entries)));
        }
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || !lock_slot(slot).is_empty());
        log::info!(
            "Ledger reinitialized from {} agent(s), {} cloud(s) counted",
            agents.len(),
            slots.len()
        );
    }

    /// Releases the executors of an agent that went away.
    ///
    /// Returns false if the agent does not belong to any of `clouds`.
    pub fn release_for_agent(&self, clouds: &[CloudRef], agent: &Agent) -> bool {
        let Some(owner) = resolve_owner(clouds, agent) else {
            log::debug!("Agent {} does not belong to any cloud", agent.name());
            return false;
        };
        self.release(
            owner.cloud.as_ref(),
            owner.template.as_ref(),
            agent.num_executors(),
        );
        true
    }

    pub fn statistics(&self) -> LedgerStatistics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        LedgerStatistics {
            registration_attempts: load(&self.counters.registration_attempts),
            rejected_registrations: load(&self.counters.rejected_registrations),
            releases: load(&self.counters.releases),
            cancellations: load(&self.counters.cancellations),
            concurrent_registrations: load(&self.counters.concurrent_registrations),
        }
    }

    /// Zeroes the statistics counters. Reserved counts are not touched.
    pub fn reset_statistics(&self) {
        for counter in [
            &self.counters.registration_attempts,
            &self.counters.rejected_registrations,
            &self.counters.releases,
            &self.counters.cancellations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        log::info!("Ledger statistics were reset");
    }

    /// Returns all non-zero counters, sorted by cloud name and template.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let slots: Vec<(String, CloudSlot)> = self
            .lock_clouds()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        let mut result = Vec::new();
        for (name, slot) in slots {
            let entries = lock_slot(&slot);
            if entries.active.global > 0 || entries.pending.global > 0 {
                result.push(LedgerEntry {
                    cloud_name: name.clone(),
                    template: None,
                    active: entries.active.global,
                    pending: entries.pending.global,
                });
            }
            let mut templates: Vec<&TemplateId> = entries
                .active
                .templates
                .keys()
                .chain(entries.pending.templates.keys())
                .collect();
            templates.sort();
            templates.dedup();
            result.extend(templates.into_iter().map(|template| LedgerEntry {
                cloud_name: name.clone(),
                template: Some(template.clone()),
                active: entries.active.template(template),
                pending: entries.pending.template(template),
            }));
        }
        result.sort();
        result
    }

    /// Counters with executors of unfinished launches.
    pub fn pending_entries(&self) -> Vec<LedgerEntry> {
        let mut entries = self.entries();
        entries.retain(|entry| entry.pending > 0);
        entries
    }

    /// Snapshot of all counters and statistics, for diagnostics.
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            entries: self.entries(),
            statistics: self.statistics(),
        }
    }

    fn admit(
        &self,
        cloud: &dyn Cloud,
        template: Option<&TemplateId>,
        count: u32,
        bucket: Bucket,
    ) -> bool {
        self.counters
            .registration_attempts
            .fetch_add(1, Ordering::Relaxed);
        let limits = cloud.limits();
        if !limits.is_limited() || count == 0 {
            return true;
        }

        self.counters
            .concurrent_registrations
            .fetch_add(1, Ordering::Relaxed);
        let name = cloud.name();
        let slot = self.get_or_create_slot(name);
        let admitted = {
            let mut entries = lock_slot(&slot);
            let global = entries.global();
            let template_count = template.map(|t| entries.template(t)).unwrap_or(0);
            if !limits.global_cap().admits(global, count) {
                log::info!(
                    "Cannot reserve {count} executor(s) of cloud {name}: {} active, {} pending, cap is {:?}",
                    entries.active.global,
                    entries.pending.global,
                    limits.global_cap()
                );
                false
            } else if let Some(t) =
                template.filter(|t| !limits.template_cap(t).admits(template_count, count))
            {
                log::info!(
                    "Cannot reserve {count} executor(s) of template {t} in cloud {name}: {template_count} already reserved, cap is {:?}",
                    limits.template_cap(t)
                );
                false
            } else {
                entries.bucket_mut(bucket).add(template, count);
                log::debug!(
                    "Reserved {count} {bucket:?} executor(s) of cloud {name} (template {template:?}), now {} in total",
                    entries.global()
                );
                true
            }
        };
        drop(slot);
        self.counters
            .concurrent_registrations
            .fetch_sub(1, Ordering::Relaxed);

        if !admitted {
            self.counters
                .rejected_registrations
                .fetch_add(1, Ordering::Relaxed);
            self.remove_unused_slot(name);
        }
        admitted
    }

    pub(crate) fn release_by_name(
        &self,
        cloud_name: &str,
        template: Option<&TemplateId>,
        count: u32,
    ) {
        if count == 0 {
            return;
        }
        self.counters.releases.fetch_add(1, Ordering::Relaxed);
        self.update_slot(cloud_name, |entries| {
            entries.active.remove(template, count);
            log::debug!(
                "Released {count} executor(s) of cloud {cloud_name} (template {template:?}), now {} in total",
                entries.global()
            );
        });
    }

    /// Drops a pending reservation whose launch did not happen.
    pub(crate) fn cancel_by_name(
        &self,
        cloud_name: &str,
        template: Option<&TemplateId>,
        count: u32,
    ) {
        if count == 0 {
            return;
        }
        self.counters.cancellations.fetch_add(1, Ordering::Relaxed);
        self.update_slot(cloud_name, |entries| {
            entries.pending.remove(template, count);
            log::debug!(
                "Cancelled {count} pending executor(s) of cloud {cloud_name} (template {template:?}), now {} in total",
                entries.global()
            );
        });
    }

    /// Moves executors of a finished launch from pending to active.
    pub(crate) fn confirm_by_name(
        &self,
        cloud_name: &str,
        template: Option<&TemplateId>,
        count: u32,
    ) {
        if count == 0 {
            return;
        }
        let slot = self.get_or_create_slot(cloud_name);
        let mut entries = lock_slot(&slot);
        entries.pending.remove(template, count);
        entries.active.add(template, count);
        log::debug!(
            "Confirmed {count} executor(s) of cloud {cloud_name} (template {template:?}), {} active",
            entries.active.global
        );
    }

    fn read_slot<T: Default>(&self, cloud_name: &str, f: impl FnOnce(&CloudEntries) -> T) -> T {
        match self.get_slot(cloud_name) {
            Some(slot) => {
                let entries = lock_slot(&slot);
                f(&entries)
            }
            None => T::default(),
        }
    }

    fn update_slot(&self, cloud_name: &str, f: impl FnOnce(&mut CloudEntries)) {
        let Some(slot) = self.get_slot(cloud_name) else {
            log::debug!("Nothing reserved in cloud {cloud_name}, ignoring update");
            return;
        };
        {
            let mut entries = lock_slot(&slot);
            f(&mut entries);
        }
        drop(slot);
        self.remove_unused_slot(cloud_name);
    }

    fn lock_clouds(&self) -> MutexGuard<'_, Map<String, CloudSlot>> {
        self.clouds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_slot(&self, cloud_name: &str) -> Option<CloudSlot> {
        self.lock_clouds().get(cloud_name).cloned()
    }

    fn get_or_create_slot(&self, cloud_name: &str) -> CloudSlot {
        let mut clouds = self.lock_clouds();
        if let Some(slot) = clouds.get(cloud_name) {
            return slot.clone();
        }
        let slot = CloudSlot::default();
        clouds.insert(cloud_name.to_string(), slot.clone());
        slot
    }

    fn remove_unused_slot(&self, cloud_name: &str) {
        let mut slots = self.lock_clouds();
        let unused = slots
            .get(cloud_name)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && lock_slot(slot).is_empty());
        if unused {
            slots.remove(cloud_name);
        }
    }
}
