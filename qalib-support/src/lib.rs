//! # Qalib Support
//!
//! Shared utilities for the Qalib container crates.
//!
//! This crate provides:
//! - Text rendering for descriptors and error messages

pub mod rendering;
