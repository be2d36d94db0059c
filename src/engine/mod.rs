//! Server-side test endpoints.
//!
//! The [`generator`] streams download payloads and the [`receiver`] drains
//! uploads.  Both are stateless axum handlers; every request owns its own
//! random source and byte counters, so concurrent tests never share state.

pub mod generator;
pub mod receiver;
