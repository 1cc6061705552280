//! # rexpet-studio
//!
//! The generation pipeline: request handling, the worker pool and the reaper.
//!
//! ## Credit flow
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  request ── reserve (-1) + pending ── enqueue ──▶ respond    │
//! │  worker  ── processing ── generate ── store ── completed     │
//! │                 │                                            │
//! │                 └── any error ──▶ failed + refund (+1)       │
//! │  reaper  ── expired lease / stale record ──▶ failed + refund │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One credit is in flight from reservation until the record is terminal.
//! Every path into `failed` goes through the store's atomic fail-and-refund,
//! so a generation is refunded at most once.

pub mod catalog;
pub mod config;
mod failure;
pub mod profile;
pub mod reaper;
pub mod service;
pub mod worker;

#[cfg(test)]
mod testkit;

pub use catalog::{active_styles, built_in_styles, load_styles, seed_styles};
pub use config::StudioConfig;
pub use profile::{Profile, ProfileService, ProfileUpdate};
pub use reaper::{Reaper, SweepReport};
pub use service::{
    CreditSummary, GenerationHistory, GenerationRequest, GenerationService, GenerationTicket,
    HistoryItem,
};
pub use worker::GenerationWorker;
