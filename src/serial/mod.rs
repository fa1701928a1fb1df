//! Serial port module
//!
//! This module provides functionality for:
//! - Opening the device with the configured line settings
//! - Listing available serial ports

pub mod port;

pub use port::open_device;
