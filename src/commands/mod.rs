// Stack commands
pub mod diff;
pub mod graph;
pub mod list;
pub mod synth;
