//! TapeFlow Scheduler Engine
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! The persistent, lock-guarded scheduled-task engine: calendar math for
//! every schedule kind, the 60-second tick loop, the per-execution
//! lifecycle with its lock discipline, the action dispatcher and the
//! operator unlock routines.

#![forbid(unsafe_code)]

pub mod actions;
pub mod calculator;
pub mod engine;
pub mod executor;
pub mod unlocker;

pub use actions::{ActionContext, ActionHandler, ActionRegistry};
pub use calculator::{calculate_next_run_time, validate_schedule_config};
pub use engine::SchedulerEngine;
