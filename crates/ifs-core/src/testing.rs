// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only utilities
//!
//! Fault-injecting content stores and provider builders over temporary
//! directories.

#[cfg(test)]
pub mod faulty_store;
