//! Turn-based two-party game state sync.
//!
//! One JSON state tree, mutated only through the Diff Engine, driven by a
//! phase state machine and replicated host-authoritatively with client
//! prediction and rollback.

pub mod action;
pub mod action_log;
pub mod checksum;
pub mod config;
pub mod diff;
pub mod effect;
pub mod error;
pub mod model;
pub mod net;
pub mod orchestrator;
pub mod phase;
pub mod replay;
pub mod rng;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod types;
