// src/core/mod.rs — Core iteration engine

pub mod budget;
pub mod contracts;
pub mod convergence;
pub mod executor;
pub mod orchestrator;
pub mod react_parser;
pub mod system_prompt;
pub mod tools;
pub mod trace;
pub mod types;
