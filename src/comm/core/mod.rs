pub mod codec;
pub mod model;
pub mod plan;
pub mod scanner;
pub mod table;
