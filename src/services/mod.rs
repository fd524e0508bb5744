//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room membership, batching, caching and persistence
//! so the websocket handler can stay focused on protocol translation and
//! auth plumbing. Registry, coalescer and cache are synchronous and never
//! hold a lock across `.await`; only store calls suspend.

pub mod auth;
pub mod cache;
pub mod coalescer;
pub mod persistence;
pub mod registry;
pub mod whiteboard;
