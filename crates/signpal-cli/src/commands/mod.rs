pub mod config;
pub mod daemon;
pub mod learn;
pub mod replay;
