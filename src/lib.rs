//! Advisor Gateway - telephony agent that qualifies investment leads
//!
//! This library provides the core functionality for the advisor gateway:
//! - Call handling over Asterisk ARI (answer, record, play, hang up)
//! - Per-call conversation loop (STT, reply generation, TTS)
//! - Rule-based lead extraction and qualification
//! - Lead persistence and a read-only status API
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Asterisk (ARI REST + events)            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Advisor Gateway                      │
//! │  Dispatcher │ Registry │ Sessions │ Turn controller  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        STT  │  Chat completion  │  TTS  │  Leads     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod call;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod lead;
pub mod leads;
pub mod llm;
pub mod retry;
pub mod script;
pub mod telephony;
pub mod voice;

pub use call::{CallId, CallRegistry, CallSession, CallState, EventDispatcher, TurnController};
pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use lead::{InvestmentInterest, LeadRecord, RiskTolerance};
pub use leads::LeadSink;
