//! Sysfs PWM actuator session.
//!
//! Owns the lifecycle of one PWM channel:
//!
//! ```text
//! Unexported ──open()──► Exported ──enable()──► Enabled
//!                           │                     │
//!                           │                 configure()
//!                           │                     ▼
//!                           └──────────────► Disabled
//!                                                 │
//!                        close() (any state) ─► TornDown
//! ```
//!
//! The hardware surface is reached through the [`PwmIo`] seam so the
//! session logic is testable without sysfs. [`SysfsPwm`] is the real
//! implementation (`/sys/class/pwm/pwmchip<N>/pwm<M>/`).
//!
//! Teardown invariants:
//! - `close()` is idempotent and runs on every exit path (`Drop` is the
//!   backstop for panics and early returns).
//! - A channel that was already exported by someone else is adopted but
//!   never unexported by this process.
//! - Duty is reset to 0 during `configure()` — the output never starts
//!   energized.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts made waiting for an exported channel directory to appear.
const EXPORT_POLL_ATTEMPTS: u32 = 50;

/// Delay between export polls.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Error types for actuator operations.
#[derive(Debug, Error)]
pub enum PwmError {
    /// A control-surface write failed.
    #[error("pwm write to {path} failed: {source}")]
    Write {
        /// Control file the write targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The channel directory never appeared after export.
    #[error("pwm channel did not appear within the export wait window")]
    ExportTimeout,

    /// Operation requires an exported channel.
    #[error("pwm channel is not exported")]
    NotExported,

    /// Duty writes are only valid while the output is enabled.
    #[error("duty write rejected: pwm output not enabled")]
    NotEnabled,
}

/// Fallible textual I/O against one PWM channel's control surface.
///
/// Implemented by [`SysfsPwm`] for real hardware and by fakes in tests.
pub trait PwmIo {
    /// Whether the channel's control directory is present.
    fn exists(&self) -> bool;
    /// Ask the chip to expose the channel.
    fn export(&self) -> Result<(), PwmError>;
    /// Ask the chip to withdraw the channel.
    fn unexport(&self) -> Result<(), PwmError>;
    /// Write the output period in nanoseconds.
    fn write_period_ns(&self, period_ns: u64) -> Result<(), PwmError>;
    /// Write the active duty in nanoseconds.
    fn write_duty_ns(&self, duty_ns: u64) -> Result<(), PwmError>;
    /// Switch the output stage on or off.
    fn write_enable(&self, enable: bool) -> Result<(), PwmError>;
}

/// Sysfs implementation of [`PwmIo`].
///
/// The sysfs root is parameterizable so tests can point it at a
/// temporary directory.
#[derive(Debug, Clone)]
pub struct SysfsPwm {
    root: PathBuf,
    chip: u32,
    channel: u32,
}

impl SysfsPwm {
    /// Channel `channel` on `pwmchip<chip>` under `/sys/class/pwm`.
    pub fn new(chip: u32, channel: u32) -> Self {
        Self::with_root("/sys/class/pwm", chip, channel)
    }

    /// Same, with an explicit sysfs root.
    pub fn with_root(root: impl Into<PathBuf>, chip: u32, channel: u32) -> Self {
        Self {
            root: root.into(),
            chip,
            channel,
        }
    }

    fn chip_dir(&self) -> PathBuf {
        self.root.join(format!("pwmchip{}", self.chip))
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip_dir().join(format!("pwm{}", self.channel))
    }

    fn write_value(path: PathBuf, value: &str) -> Result<(), PwmError> {
        std::fs::write(&path, value).map_err(|source| PwmError::Write { path, source })
    }
}

impl PwmIo for SysfsPwm {
    fn exists(&self) -> bool {
        self.channel_dir().exists()
    }

    fn export(&self) -> Result<(), PwmError> {
        Self::write_value(self.chip_dir().join("export"), &self.channel.to_string())
    }

    fn unexport(&self) -> Result<(), PwmError> {
        Self::write_value(self.chip_dir().join("unexport"), &self.channel.to_string())
    }

    fn write_period_ns(&self, period_ns: u64) -> Result<(), PwmError> {
        Self::write_value(self.channel_dir().join("period"), &period_ns.to_string())
    }

    fn write_duty_ns(&self, duty_ns: u64) -> Result<(), PwmError> {
        Self::write_value(self.channel_dir().join("duty_cycle"), &duty_ns.to_string())
    }

    fn write_enable(&self, enable: bool) -> Result<(), PwmError> {
        Self::write_value(
            self.channel_dir().join("enable"),
            if enable { "1" } else { "0" },
        )
    }
}

/// Lifecycle state of the actuator session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel not exported (initial state).
    Unexported,
    /// Channel present, output stage off, not yet configured or enabled.
    Exported,
    /// Output stage on; duty writes are applied.
    Enabled,
    /// Output stage off after having been enabled.
    Disabled,
    /// Teardown complete (terminal).
    TornDown,
}

/// Owned lifecycle of one PWM output.
///
/// Exactly one instance exists per process; it is exclusively owned by
/// the control loop. Export ownership is tracked on the session value,
/// so the process never unexports a channel it did not export.
pub struct PwmSession<IO: PwmIo> {
    io: IO,
    state: SessionState,
    owns_export: bool,
    period_ns: u64,
}

impl<IO: PwmIo> PwmSession<IO> {
    /// New session over an I/O surface. No hardware is touched yet.
    pub fn new(io: IO) -> Self {
        Self {
            io,
            state: SessionState::Unexported,
            owns_export: false,
            period_ns: 0,
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether teardown must unexport the channel.
    #[inline]
    pub const fn owns_export(&self) -> bool {
        self.owns_export
    }

    /// Make the channel available: Unexported → Exported.
    ///
    /// If the channel directory already exists it is adopted without
    /// re-exporting and without taking ownership for teardown.
    /// Otherwise the export control is written and the channel directory
    /// is polled with a bounded window.
    ///
    /// # Errors
    ///
    /// [`PwmError::ExportTimeout`] if the window is exhausted — a fatal
    /// setup error. The export ownership is still recorded, so a later
    /// `close()` undoes the export.
    pub fn open(&mut self) -> Result<(), PwmError> {
        match self.state {
            SessionState::Unexported => {}
            SessionState::TornDown => return Err(PwmError::NotExported),
            _ => return Ok(()),
        }

        if self.io.exists() {
            debug!("pwm channel already exported, adopting without ownership");
            self.state = SessionState::Exported;
            return Ok(());
        }

        self.io.export()?;
        self.owns_export = true;

        for _ in 0..EXPORT_POLL_ATTEMPTS {
            if self.io.exists() {
                self.state = SessionState::Exported;
                return Ok(());
            }
            thread::sleep(EXPORT_POLL_INTERVAL);
        }
        Err(PwmError::ExportTimeout)
    }

    /// Set the output period and reset duty to the fail-safe zero.
    ///
    /// Some kernels reject period writes while the output is enabled,
    /// and an adopted channel may still be enabled from a previous
    /// owner, so the output is switched off first. A rejected period
    /// write is reported but not fatal (the requested period is kept
    /// for duty arithmetic, matching the chip's usual behavior of
    /// retaining the last accepted period). The enable decision is left
    /// to the caller.
    ///
    /// # Errors
    ///
    /// Fails if the duty reset cannot be written — a session that
    /// cannot reach a known-safe duty must not run.
    pub fn configure(&mut self, period_ns: u64) -> Result<(), PwmError> {
        if matches!(self.state, SessionState::Unexported | SessionState::TornDown) {
            return Err(PwmError::NotExported);
        }

        let _ = self.io.write_enable(false);
        if self.state == SessionState::Enabled {
            self.state = SessionState::Disabled;
        }

        self.period_ns = period_ns;
        if let Err(e) = self.io.write_period_ns(period_ns) {
            warn!("failed to set pwm period: {e}");
        }

        self.io.write_duty_ns(0)
    }

    /// Switch the output stage on: Exported/Disabled → Enabled.
    ///
    /// # Errors
    ///
    /// Propagates the enable write failure; callers treat it as
    /// non-fatal and keep the loop running in a degraded state.
    pub fn enable(&mut self) -> Result<(), PwmError> {
        match self.state {
            SessionState::Exported | SessionState::Disabled => {
                self.io.write_enable(true)?;
                self.state = SessionState::Enabled;
                Ok(())
            }
            SessionState::Enabled => Ok(()),
            SessionState::Unexported | SessionState::TornDown => Err(PwmError::NotExported),
        }
    }

    /// Apply a braking percentage as a duty write.
    ///
    /// `duty_ns = period_ns * percent / 100`, integer floor.
    ///
    /// # Errors
    ///
    /// [`PwmError::NotEnabled`] while the output is not enabled — a
    /// no-op the caller logs and survives, not a fatal condition.
    pub fn set_duty(&mut self, percent: u8) -> Result<(), PwmError> {
        if self.state != SessionState::Enabled {
            return Err(PwmError::NotEnabled);
        }
        let duty_ns = self.period_ns * u64::from(percent.min(100)) / 100;
        self.io.write_duty_ns(duty_ns)
    }

    /// Tear the session down: any state → TornDown.
    ///
    /// Disables the output if enabled, then unexports the channel only
    /// if this session exported it. Idempotent; teardown failures are
    /// logged, never propagated.
    pub fn close(&mut self) {
        if self.state == SessionState::TornDown {
            return;
        }

        if self.state == SessionState::Enabled {
            if let Err(e) = self.io.write_enable(false) {
                warn!("failed to disable pwm during teardown: {e}");
            }
        }
        if self.owns_export {
            if let Err(e) = self.io.unexport() {
                warn!("failed to unexport pwm channel: {e}");
            }
        }
        self.state = SessionState::TornDown;
    }
}

impl<IO: PwmIo> Drop for PwmSession<IO> {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
