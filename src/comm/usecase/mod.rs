pub mod engine;
pub mod explore;
