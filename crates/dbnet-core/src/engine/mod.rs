//! The inference engine core.
//!
//! This module provides:
//! - **errors**: Error taxonomy shared by every algorithm
//! - **factor**: Potentials over transient variables and their algebra

pub mod errors;
pub mod factor;
