pub mod broker;
pub mod config;
pub mod engine;
pub mod execution;
pub mod pipeline;
pub mod stages;
