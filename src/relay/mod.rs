//! Console <-> serial device relay
//!
//! This module provides:
//! - Line-ending converters for each direction
//! - The per-direction copy loop and its termination reasons
//! - The session coordinator running both directions concurrently

pub mod convert;
pub mod copy;
pub mod session;

pub use convert::LineEnding;
pub use session::{run_session, SessionConfig};
