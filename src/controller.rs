//! Reconciliation control loop
//!
//! Drives one full cycle against a device: wait for the controller to be
//! ready, export, diff, merge, submit, and recover from a rejected import
//! with exactly one reset-and-retry. Transport failures are never retried
//! here; they propagate to the caller immediately.

use crate::changeset::ChangeSet;
use crate::compiler;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::intent::Intent;
use crate::merge;
use crate::poll::{poll_until, Clock, PollOutcome};
use crate::raid::RaidPlan;
use crate::store::{ConfigStore, Postfix};
use crate::sync;
use crate::transport::{ClientBiosRegistry, DeviceReset, ManagementClient};
use std::time::Duration;

/// One bounded wait: how often to check and how many times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub interval: Duration,
    pub attempts: u32,
}

impl Wait {
    pub const fn secs(interval: u64, attempts: u32) -> Self {
        Self {
            interval: Duration::from_secs(interval),
            attempts,
        }
    }
}

/// Budgets for every wait in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Lifecycle controller idle before and after operations. Fatal.
    pub controller_idle: Wait,
    /// Running jobs draining before the cycle starts. Fatal.
    pub job_drain: Wait,
    /// Job queue emptying after a clear request. Warn-only.
    pub queue_empty: Wait,
    /// Retries of the clear-queue request itself.
    pub clear_queue: Wait,
    /// Virtual disks initializing after a RAID-carrying import. Fatal.
    pub virtual_disks: Wait,
    /// Controller answering again after a hard reset. Warn-only; the fatal
    /// idle wait follows it.
    pub post_reset: Wait,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            controller_idle: Wait::secs(60, 30),
            job_drain: Wait::secs(30, 10),
            queue_empty: Wait::secs(15, 10),
            clear_queue: Wait::secs(30, 4),
            virtual_disks: Wait::secs(60, 30),
            post_reset: Wait::secs(15, 12),
        }
    }
}

/// Result of a successful reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The device already satisfied the declared configuration; nothing was
    /// submitted.
    Satisfied,
    /// A configuration was submitted and accepted.
    Applied,
}

/// One reconciliation cycle against one device.
pub struct Reconciler<C, R, K> {
    pub client: C,
    pub reset: R,
    pub store: ConfigStore,
    pub clock: K,
    pub budgets: Budgets,
    pub intent: Intent,
}

impl<C, R, K> Reconciler<C, R, K>
where
    C: ManagementClient,
    R: DeviceReset,
    K: Clock,
{
    pub fn new(client: C, reset: R, store: ConfigStore, clock: K, intent: Intent) -> Self {
        Self {
            client,
            reset,
            store,
            clock,
            budgets: Budgets::default(),
            intent,
        }
    }

    /// Run one full cycle.
    pub fn run(&mut self) -> Result<Outcome> {
        self.wait_idle()?;
        self.wait_jobs_drained()?;

        let exported = self.export()?;
        let inventory = self.client.physical_disks()?;
        let plan = RaidPlan::build(&self.intent.raid, &inventory);
        let changes = compiler::compile(&self.intent, &exported);

        if sync::in_sync(&changes, &plan, &exported, &self.intent)?
            && !self.intent.ensure.is_teardown()
            && !self.intent.force_reboot
        {
            log::info!("declared configuration already satisfied; nothing to submit");
            return Ok(Outcome::Satisfied);
        }
        if self.intent.force_reboot {
            log::info!("force_reboot requested; submitting regardless of the sync verdict");
        }

        match self.submit(&changes, &plan, exported) {
            Ok(()) => Ok(Outcome::Applied),
            Err(Error::ConfigRejected { job }) => {
                log::warn!(
                    "configuration import rejected{}; resetting the controller and retrying once",
                    job.map(|j| format!(" (job {j})")).unwrap_or_default()
                );
                self.recover()?;
                let exported = self.export()?;
                let changes = compiler::compile(&self.intent, &exported);
                if sync::in_sync(&changes, &plan, &exported, &self.intent)?
                    && !self.intent.ensure.is_teardown()
                    && !self.intent.force_reboot
                {
                    log::info!("configuration satisfied after recovery; not resubmitting");
                    return Ok(Outcome::Applied);
                }
                match self.submit(&changes, &plan, exported) {
                    Ok(()) => Ok(Outcome::Applied),
                    Err(Error::ConfigRejected { .. }) => Err(Error::ImportRejectedAfterRetry),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Preset import (when needed), merge, main import, virtual-disk wait.
    fn submit(&mut self, changes: &ChangeSet, plan: &RaidPlan, exported: Document) -> Result<()> {
        let mut current = exported;
        if let Some(preset) = compiler::preset(changes, &current) {
            log::info!("importing the preparatory configuration");
            let path = self.store.write(Postfix::Preset, &preset)?;
            self.client.import_config(&path)?;
            // Re-export so the merge base reflects the preset's effects
            current = self.export()?;
        }

        let base = if self.intent.clone_reference {
            self.store.read(Postfix::Reference)?
        } else {
            current.clone()
        };
        let merged = {
            let mut registry = ClientBiosRegistry::new(&mut self.client);
            merge::merge(&base, &current, changes, plan, &self.intent, &mut registry)?
        };
        let path = self.store.write(Postfix::Base, &merged)?;

        log::info!("importing the system configuration");
        let job = self.client.import_config(&path)?;
        log::info!("configuration import job {job} accepted");

        if !plan.controllers.is_empty() && !self.intent.ensure.is_teardown() {
            self.wait_virtual_disks()?;
        }
        Ok(())
    }

    /// Export the device's configuration into the `original` snapshot. A
    /// failed export gets one reset before the retry; a second failure
    /// propagates.
    fn export(&mut self) -> Result<Document> {
        let path = self.store.path(Postfix::Original);
        if let Err(err) = self.client.export_config(&path) {
            log::warn!("configuration export failed: {err}; resetting the controller and retrying");
            self.reset.reset()?;
            self.settle_after_reset()?;
            self.wait_idle()?;
            self.client.export_config(&path)?;
        }
        self.store.read(Postfix::Original)
    }

    /// Reset, clear the job queue, reboot and wait for the controller to
    /// come back. Used after a rejected import.
    fn recover(&mut self) -> Result<()> {
        self.reset.reset()?;
        self.settle_after_reset()?;
        self.wait_idle()?;
        self.clear_queue()?;
        self.client.reboot()?;
        self.wait_idle()?;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        let Wait { interval, attempts } = self.budgets.controller_idle;
        let client = &mut self.client;
        let outcome = poll_until(&mut self.clock, interval, attempts, || {
            Ok(client.controller_status()? == 0)
        })?;
        match outcome {
            PollOutcome::Ready => Ok(()),
            PollOutcome::TimedOut => Err(Error::Timeout {
                waiting_for: "the lifecycle controller to become idle".into(),
            }),
        }
    }

    fn wait_jobs_drained(&mut self) -> Result<()> {
        let Wait { interval, attempts } = self.budgets.job_drain;
        let client = &mut self.client;
        let outcome = poll_until(&mut self.clock, interval, attempts, || {
            let jobs = client.running_jobs()?;
            if !jobs.is_empty() {
                log::debug!("waiting on running jobs: {jobs:?}");
            }
            Ok(jobs.is_empty())
        })?;
        match outcome {
            PollOutcome::Ready => Ok(()),
            PollOutcome::TimedOut => Err(Error::Timeout {
                waiting_for: "running jobs to drain".into(),
            }),
        }
    }

    fn wait_virtual_disks(&mut self) -> Result<()> {
        let Wait { interval, attempts } = self.budgets.virtual_disks;
        let client = &mut self.client;
        let outcome = poll_until(&mut self.clock, interval, attempts, || {
            client.virtual_disks_ready()
        })?;
        match outcome {
            PollOutcome::Ready => Ok(()),
            PollOutcome::TimedOut => Err(Error::Timeout {
                waiting_for: "virtual disks to initialize".into(),
            }),
        }
    }

    /// Right after a hard reset the controller drops connections; status
    /// errors count as not-ready here, and exhaustion is only a warning
    /// since the fatal idle wait follows.
    fn settle_after_reset(&mut self) -> Result<()> {
        let Wait { interval, attempts } = self.budgets.post_reset;
        let client = &mut self.client;
        let outcome = poll_until(&mut self.clock, interval, attempts, || {
            Ok(matches!(client.controller_status(), Ok(0)))
        })?;
        if outcome == PollOutcome::TimedOut {
            log::warn!("controller not answering after reset yet; proceeding to the idle wait");
        }
        Ok(())
    }

    /// Ask the device to clear its job queue, retrying the request a few
    /// times. A queue that never empties is a soft warning, not a failure.
    fn clear_queue(&mut self) -> Result<()> {
        let Wait { interval, attempts } = self.budgets.clear_queue;
        let queue = self.budgets.queue_empty;
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.clock.sleep(interval);
            }
            if let Err(err) = self.client.clear_job_queue() {
                log::warn!("clearing the job queue failed (attempt {attempt}/{attempts}): {err}");
                continue;
            }
            let client = &mut self.client;
            let outcome = poll_until(&mut self.clock, queue.interval, queue.attempts, || {
                Ok(client.job_queue_len()? == 0)
            })?;
            if outcome.is_ready() {
                return Ok(());
            }
            log::warn!("job queue still not empty (attempt {attempt}/{attempts})");
        }
        log::warn!("job queue did not empty; continuing with the cycle anyway");
        Ok(())
    }
}
