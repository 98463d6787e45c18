//! The probe helper service.
//!
//! [`ProbeHelper`] ties the dispatch registry, the pending table and the
//! liveness monitor together. Transports call [`ProbeHelper::handle_probe`]
//! for probe requests (ACK is `Ok(())`, NACK is the error) and
//! [`ProbeHelper::handle_delivery`] for delivered events.

use std::sync::Arc;

use humantime::format_duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::Clients;
use crate::config::ProbeHelperConfig;
use crate::error::{ExecutionError, ProbeResult};
use crate::event::Event;

use super::liveness::{LivenessMonitor, LivenessStatus};
use super::pending::{PendingTable, WaitOutcome};
use super::receiver::correlation_key_for_delivered;
use super::registry::DispatchRegistry;

/// Round-trip prober shared by every listener.
#[derive(Debug)]
pub struct ProbeHelper {
    config: ProbeHelperConfig,
    registry: DispatchRegistry,
    pending: Arc<PendingTable>,
    liveness: LivenessMonitor,
    shutdown: CancellationToken,
}

impl ProbeHelper {
    /// Builds a helper; liveness starts out fresh.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `config` is inconsistent.
    pub fn new(config: ProbeHelperConfig, clients: Clients) -> ProbeResult<Self> {
        config.validate()?;
        let registry = DispatchRegistry::new(clients, config.deadline_policy(), config.pods.clone());
        Ok(Self {
            liveness: LivenessMonitor::new(config.liveness_stale_duration),
            registry,
            pending: Arc::new(PendingTable::new()),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn config(&self) -> &ProbeHelperConfig {
        &self.config
    }

    /// The table of outstanding probes.
    #[must_use]
    pub const fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Token cancelled by [`ProbeHelper::shutdown`]. Child tokens of it make
    /// a good graceful-shutdown signal for listeners.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs one probe round trip.
    ///
    /// Returns `Ok(())` (ACK) once the matching delivered event has been
    /// received. Validation and trigger failures return immediately with no
    /// pending entry left behind. The deadline bounds the trigger call as
    /// well as the wait. Dropping the returned future deregisters the probe.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unknown kind or bad extensions
    /// - `Trigger` if the external effect could not be performed
    /// - `Execution` on timeout, key collision or shutdown
    pub async fn handle_probe(&self, event: Event) -> ProbeResult<()> {
        let admission = match self.registry.admit(&event) {
            Ok(admission) => admission,
            Err(err) => {
                warn!(id = %event.id, kind = %event.kind, error = %err, "rejecting probe request");
                return Err(err.into());
            }
        };
        let key = admission.key.clone();
        debug!(
            id = %event.id,
            kind = %admission.probe.kind(),
            key = %key,
            wait = %format_duration(admission.wait),
            "probe admitted"
        );

        let started = Instant::now();
        let waiter = self
            .pending
            .register(key.clone(), started + admission.wait)
            .inspect_err(|err| warn!(key = %key, error = %err, "probe not registered"))?;

        let deadline = waiter.deadline();
        tokio::select! {
            () = self.shutdown.cancelled() => {
                waiter.abandon();
                return Err(ExecutionError::ShuttingDown.into());
            }
            // The wait below then settles the outcome without racing a delivery.
            () = tokio::time::sleep_until(deadline) => {
                warn!(key = %key, "probe trigger did not complete before the deadline");
            }
            triggered = self.registry.trigger(&admission.probe, &event) => {
                if let Err(err) = triggered {
                    waiter.abandon();
                    warn!(key = %key, error = %err, "probe trigger failed");
                    return Err(err.into());
                }
            }
        }

        let outcome = tokio::select! {
            () = self.shutdown.cancelled() => WaitOutcome::Cancelled,
            outcome = waiter.wait() => outcome,
        };

        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            WaitOutcome::Delivered => {
                info!(key = %key, waited_ms, "probe round trip succeeded");
                Ok(())
            }
            WaitOutcome::Expired => {
                warn!(key = %key, waited_ms, "probe timed out");
                Err(ExecutionError::Timeout { key, waited_ms }.into())
            }
            WaitOutcome::Cancelled => {
                debug!(key = %key, "probe released by shutdown");
                Err(ExecutionError::ShuttingDown.into())
            }
        }
    }

    /// Matches a delivered event against the outstanding probes.
    ///
    /// Returns true if it resolved one. Unmatched events are ignored.
    pub fn handle_delivery(&self, event: &Event) -> bool {
        let Some(key) = correlation_key_for_delivered(event) else {
            debug!(id = %event.id, kind = %event.kind, "ignoring unrecognized delivered event");
            return false;
        };
        if self.pending.resolve(&key) {
            self.liveness.record_success();
            debug!(key = %key, id = %event.id, "resolved pending probe");
            true
        } else {
            debug!(key = %key, id = %event.id, "no pending probe for delivered event");
            false
        }
    }

    /// Current liveness; logs a warning when stale.
    #[must_use]
    pub fn health(&self) -> LivenessStatus {
        let status = self.liveness.check();
        if !status.healthy {
            warn!(
                since_last_success = %format_duration(status.since_last_success),
                stale_duration = %format_duration(status.stale_duration),
                "no successful probe round trip within the stale duration"
            );
        }
        status
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    /// Runs background maintenance until `cancel` or the helper's own
    /// shutdown fires, then shuts the helper down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let sweeper = Arc::clone(&self.pending).run_sweeper(self.config.sweep_interval, self.shutdown.clone());
        tokio::select! {
            () = cancel.cancelled() => {}
            () = sweeper => {}
        }
        self.shutdown();
    }

    /// Releases every outstanding probe as NACK and refuses new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let released = self.pending.close();
        info!(released, "probe helper shut down");
    }

    /// True once [`ProbeHelper::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
