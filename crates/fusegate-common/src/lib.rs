//! Shared types for the fusegate proxy: the fixed-epoch clock, the command
//! classifier, execution statuses, and the window statistics exchanged
//! between the telemetry store and the rule evaluator.

pub mod clock;
pub mod command;
pub mod types;
