//! Shared types for the Tally poll server: domain enums, REST payloads and
//! gateway events. No I/O lives here.

pub mod api;
pub mod events;
pub mod models;
