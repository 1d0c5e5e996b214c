//! trdl CLI - secure software delivery agent.

pub mod commands;
pub mod output;
