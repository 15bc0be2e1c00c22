//! Adapter layer: block readers, sinks, field table files and on-disk storage.

pub mod config_loader;
pub mod reader;
pub mod sink;
pub mod storage;
