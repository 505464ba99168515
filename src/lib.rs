//! GMV operations agent: a tool-calling chat loop over the pipeline and
//! SLURM, plus a deterministic policy engine for step outcomes.

pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod harvest;
pub mod llm;
pub mod pipeline;
pub mod policy;
pub mod tools;
