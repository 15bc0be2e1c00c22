//! PLC data block mapping: typed decoding of raw blocks against a field table, polling and sinks.

pub mod adapters;
pub mod core;
pub mod error;
pub mod usecase;
