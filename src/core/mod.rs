pub mod config;
pub mod error;
pub mod region;
pub mod types;

pub use config::*;
pub use error::*;
pub use region::*;
pub use types::*;
