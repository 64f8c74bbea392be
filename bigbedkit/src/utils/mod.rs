pub mod file;

#[cfg(feature = "cli")]
pub mod cli;

pub use file::*;
