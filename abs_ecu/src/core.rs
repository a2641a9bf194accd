//! EcuCore struct and control loop management.
//!
//! The `EcuCore` struct is the main entry point for ECU operations.
//! It owns the transport, the actuator session and the running flag,
//! and drives the steady-state iteration:
//!
//! receive → filter → decode → decide → actuate → report
//!
//! Failure policy (one class per layer):
//! - transport receive errors are fatal — the loop terminates;
//! - integrity failures are recovered locally — duty is forced to 0 and
//!   a `[0, 0]` status is reported before the next iteration;
//! - actuator and status-send failures are logged and survived, so the
//!   bus keeps seeing the commanded intent even when the output stage
//!   cannot apply it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use abs_common::config::{ConfigError, EcuConfig};
use abs_common::frame::{FrameError, TELEMETRY_FRAME_LEN, decode_telemetry, encode_status};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::braking::decide;
use crate::can::{CanError, CanTransport, RawFrame};
use crate::pwm::{PwmError, PwmIo, PwmSession};

/// Upper bound on one receive wait; the shutdown flag is re-checked at
/// least this often while the bus is quiet.
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Error types for daemon operations.
#[derive(Debug, Error)]
pub enum EcuError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// CAN transport error.
    #[error("transport error: {0}")]
    Can(#[from] CanError),

    /// PWM actuator error.
    #[error("actuator error: {0}")]
    Pwm(#[from] PwmError),
}

/// Per-run control loop counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopStats {
    /// Telemetry frames accepted by the identifier/format filter.
    pub frames_received: u64,
    /// Frames skipped by the filter (normal bus traffic).
    pub frames_ignored: u64,
    /// Frames rejected by the integrity check.
    pub integrity_failures: u64,
    /// Duty writes the actuator refused.
    pub actuator_failures: u64,
    /// Status frames delivered to the bus.
    pub reports_sent: u64,
    /// Status frames the bus refused.
    pub report_failures: u64,
}

/// ECU core: owns the control loop and all hardware handles.
pub struct EcuCore<T: CanTransport, IO: PwmIo> {
    /// Resolved configuration (validated before construction).
    config: EcuConfig,
    /// Bus access.
    transport: T,
    /// Actuator lifecycle.
    session: PwmSession<IO>,
    /// Running flag for loop control.
    running: Arc<AtomicBool>,
    /// Loop counters.
    stats: LoopStats,
}

impl<T: CanTransport, IO: PwmIo> EcuCore<T, IO> {
    /// Create a new core instance over the given collaborators.
    ///
    /// The configuration is expected to have passed
    /// [`EcuConfig::validate`] already — validation happens exactly once
    /// at startup, before any hardware is touched.
    pub fn new(config: EcuConfig, transport: T, session: PwmSession<IO>) -> Self {
        Self {
            config,
            transport,
            session,
            running: Arc::new(AtomicBool::new(false)),
            stats: LoopStats::default(),
        }
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Loop counters.
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Prepare the actuator: export, configure, enable.
    ///
    /// An enable failure is non-fatal — the loop runs degraded, still
    /// computing and reporting commands while duty writes are refused.
    ///
    /// # Errors
    ///
    /// Export or configuration failures are fatal setup errors.
    pub fn init(&mut self) -> Result<(), EcuError> {
        info!(
            "preparing pwm actuator (period {} ns)",
            self.config.period_ns
        );
        self.session.open()?;
        self.session.configure(self.config.period_ns)?;
        if let Err(e) = self.session.enable() {
            warn!("failed to enable pwm output, continuing degraded: {e}");
        }
        Ok(())
    }

    /// Run the control loop until the running flag clears or the
    /// transport fails.
    ///
    /// # Errors
    ///
    /// Returns the transport error that terminated the loop. Persistent
    /// receive failure is not retried — the bus is assumed always-on.
    pub fn run(&mut self) -> Result<(), EcuError> {
        info!(
            "control loop started (telemetry id 0x{:X}, status id 0x{:X})",
            self.config.telemetry_id, self.config.status_id
        );
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match self.transport.receive(RECV_POLL_TIMEOUT) {
                Ok(Some(raw)) => self.process_frame(&raw),
                // Quiet bus: nothing to do but re-check the flag.
                Ok(None) => {}
                Err(e) => {
                    error!("transport receive failed: {e}");
                    return Err(e.into());
                }
            }
        }

        let s = &self.stats;
        info!(
            "control loop stopped: {} frames, {} ignored, {} integrity failures, {} actuator failures",
            s.frames_received, s.frames_ignored, s.integrity_failures, s.actuator_failures
        );
        Ok(())
    }

    /// Tear down the actuator session. Idempotent; runs on every exit
    /// path (the session `Drop` is the backstop).
    pub fn shutdown(&mut self) {
        info!("shutting down: releasing pwm actuator");
        self.session.close();
    }

    /// One steady-state iteration for one received frame.
    fn process_frame(&mut self, raw: &RawFrame) {
        // Identifier/format filter: everything else on the bus is
        // ordinary traffic, not an anomaly.
        if raw.extended || raw.len != TELEMETRY_FRAME_LEN || raw.id != self.config.telemetry_id {
            self.stats.frames_ignored += 1;
            return;
        }
        self.stats.frames_received += 1;

        match decode_telemetry(&raw.data) {
            Err(FrameError::IntegrityMismatch { received, computed }) => {
                self.stats.integrity_failures += 1;
                debug!(
                    "integrity check failed: got 0x{received:02X} expected 0x{computed:02X}, forcing brake off"
                );
                // Fail-safe: corrupted input never leaves partial or
                // stale braking.
                if let Err(e) = self.session.set_duty(0) {
                    debug!("fail-safe duty write skipped: {e}");
                }
                self.report(false, 0);
            }
            Ok(frame) => {
                debug!(
                    "telemetry: dist={} mm counter={} status={:?}",
                    frame.distance_mm, frame.counter, frame.status
                );
                let cmd = decide(
                    frame.distance_mm,
                    frame.status,
                    self.config.threshold_mm,
                    self.config.min_distance_mm,
                );
                if let Err(e) = self.session.set_duty(cmd.percent) {
                    self.stats.actuator_failures += 1;
                    warn!("failed to apply duty cycle: {e}");
                }
                // Report the command actually computed, even if the
                // output stage refused it.
                self.report(cmd.active, cmd.percent);
                debug!("applied brake active={} percent={}", cmd.active, cmd.percent);
            }
        }

        if self.stats.frames_received % 1000 == 0 {
            let s = &self.stats;
            debug!(
                "loop: {} frames, {} ignored, {} integrity failures",
                s.frames_received, s.frames_ignored, s.integrity_failures
            );
        }
    }

    /// Emit a status frame reflecting the computed command.
    fn report(&mut self, active: bool, percent: u8) {
        let payload = encode_status(active, percent);
        match self.transport.send(self.config.status_id, &payload) {
            Ok(()) => self.stats.reports_sent += 1,
            Err(e) => {
                self.stats.report_failures += 1;
                warn!("failed to send status frame: {e}");
            }
        }
    }
}
