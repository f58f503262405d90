pub mod assets;
pub mod config;

pub use assets::*;
pub use config::*;
