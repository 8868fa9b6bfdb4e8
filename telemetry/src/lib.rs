//! Tracing setup shared by doctap binaries and tests.

pub mod tracing;
