//! Synthesis engine for kaginawa-stack
//!
//! The engine orchestrates:
//! 1. Planning - Load configuration and build the stack
//! 2. Diffing - Compare a synthesized template with a previous one

pub mod differ;
pub mod planner;

pub use planner::plan;
