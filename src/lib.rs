pub mod assembly;
pub mod buffer;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod identity;
pub mod instructions;
pub mod maintenance;
pub mod message;
pub mod pipeline;
pub mod program;
pub mod relay;
