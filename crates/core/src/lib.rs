//! Core utilities for the framegraph renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Application configuration
//! - Frame timing

mod config;
mod error;
mod frame_clock;
mod logging;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use frame_clock::FrameClock;
pub use logging::init_logging;
