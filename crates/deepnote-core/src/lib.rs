//! # DeepNote Core
//!
//! Memo capture, the guided deep-dive dialogue, and the traits the hub plugs
//! its transports, LLM providers and document stores into.

pub mod analysis;
pub mod archive;
pub mod assistant;
pub mod channel;
pub mod config;
pub mod deep_dive;
pub mod document;
pub mod error;
pub mod message;
pub mod provider;
pub mod questions;
pub mod session;

pub use assistant::{NoteAssistant, Sweep};
pub use config::DeepNoteConfig;
pub use deep_dive::Turn;
pub use error::{DeepNoteError, Result};
