pub mod ack;
pub mod config;
pub mod events;
pub mod export;
pub mod metadata;
