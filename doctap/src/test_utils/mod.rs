//! Helpers for tests that need a real Postgres server.

pub mod database;
