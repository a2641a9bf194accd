//! ABS Common Library
//!
//! This crate provides the shared wire-format codec and configuration
//! types for the ABS ECU workspace.
//!
//! # Module Structure
//!
//! - [`frame`] - Telemetry/status frame codec and integrity check
//! - [`config`] - ECU configuration record, loading and validation
//!
//! # Usage
//!
//! ```rust
//! use abs_common::config::EcuConfig;
//! use abs_common::frame::decode_telemetry;
//! ```

pub mod config;
pub mod frame;
