//! Common test utilities for viewrank
//!
//! This module provides shared testing infrastructure including:
//! - Item catalog fixtures
//! - An in-memory engine environment with fault injection
//! - A recording divergence observer
//!
//! # Usage
//!
//! ```rust
//! use crate::common::test_helpers::*;
//! ```
#![allow(dead_code)]

pub mod fixtures;
pub mod test_helpers;
