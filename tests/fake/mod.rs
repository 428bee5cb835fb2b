pub mod client;
pub mod config;
pub mod remote;
pub mod tunnel_server;
pub mod utils;
