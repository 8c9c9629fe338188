// src/lib.rs — Library root for tuneloop

pub mod cli;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod memory;
pub mod optimizer;
pub mod persona;
pub mod provider;
pub mod simulation;
