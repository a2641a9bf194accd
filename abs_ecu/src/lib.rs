//! # ABS ECU Library
//!
//! Distance-triggered braking control daemon. Consumes ultrasonic
//! telemetry frames from a CAN bus, validates their integrity, maps the
//! distance reading to a proportional braking command, drives a sysfs
//! PWM actuator and reports the commanded state back onto the bus.
//!
//! # Module Structure
//!
//! - [`braking`] - Pure distance → braking decision engine
//! - [`can`] - SocketCAN transport and the `CanTransport` seam
//! - [`core`] - `EcuCore` control loop and loop statistics
//! - [`pwm`] - Sysfs PWM actuator session lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     abs_ecu (daemon)                        │
//! │  ┌────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ CanTransport│◄─►│   EcuCore    │──►│  PwmSession      │  │
//! │  │ (SocketCAN) │   │ (control loop)│   │ (sysfs lifecycle)│  │
//! │  └────────────┘   └──────┬───────┘   └──────────────────┘  │
//! │                          │                                  │
//! │                          ▼                                  │
//! │                   ┌────────────┐                            │
//! │                   │  decide()  │ (pure)                     │
//! │                   └────────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Corrupted telemetry never commands braking: an integrity failure
//! forces zero duty and a `[0, 0]` status report before the loop
//! continues.

#![deny(warnings)]

pub mod braking;
pub mod can;
pub mod core;
pub mod pwm;

// Re-export key types for convenience
pub use crate::core::{EcuCore, EcuError};
pub use crate::pwm::{PwmSession, SysfsPwm};
