//! # DeepNote Hub
//!
//! Concrete backends for the core traits: an OpenAI-compatible LLM provider, a
//! GitHub contents-API document store, the LINE messaging channel, and the axum
//! server that exposes the assistant over HTTP.

pub mod api;
pub mod channels;
pub mod middleware;
pub mod providers;
pub mod stores;
