pub mod config;
pub mod connection;
pub mod contract;
pub mod error;
pub mod layers;
pub mod network;
pub mod types;
pub mod wallet;
