//! PCD offline cache library
//!
//! Exposes the interception policy, its cache storage and network seams, and
//! the CLI parsing used by the `pcd-cache` binary and integration tests.

pub mod cache;
pub mod cli;
pub mod data;
pub mod policy;
pub mod registration;
