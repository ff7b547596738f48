//! Shared helpers for integration tests.
//!
//! Lives in `helpers/mod.rs` so Cargo does not build it as a test target of
//! its own.

#![allow(dead_code)]

pub mod fakes;
pub mod harness;

pub use fakes::{Script, ScriptedCompiler, StaticResolver, compiled, source};
pub use harness::{
    Harness, TestBackend, is_compile_starting, is_store, read_until, terminal_count,
    test_connection_settings,
};
