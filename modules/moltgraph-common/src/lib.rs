pub mod config;
pub mod records;

pub use config::Config;
pub use records::*;
