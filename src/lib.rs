pub mod common;
pub mod server;
pub mod client;
pub mod utils;
