pub mod cli;
pub mod dht;
pub mod utils;
