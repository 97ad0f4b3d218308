pub mod config;
pub mod logging;

pub mod bridge;
pub mod catalog;
pub mod control;
pub mod engine;
pub mod intake;
pub mod job;
pub mod mask;
pub mod residency;
pub mod retry;
