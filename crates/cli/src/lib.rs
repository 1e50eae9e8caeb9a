pub mod cli;

pub const NAME: &str = "capstan";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
