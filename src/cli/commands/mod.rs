//! CLI command implementations

pub mod cache;
pub mod config;
pub mod package;
pub mod predex;

pub use cache::execute as cache;
pub use config::execute as config;
pub use package::execute as package;
pub use predex::execute as predex;
