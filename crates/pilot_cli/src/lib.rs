//! Line-oriented console for routine_pilot.
//!
//! ## Configuration
//!
//! `ROUTINE_PILOT_CONFIG_PATH` may point to a readable UTF-8 JSON file:
//!
//! ```json
//! {
//!   "base_url": "http://localhost:5000/api",
//!   "identity": { "provider": "native" },
//!   "poll_interval_ms": 5000,
//!   "max_poll_duration_sec": 620,
//!   "timeout_sec": 30
//! }
//! ```
//!
//! Every field is optional, unknown fields are rejected and durations must be
//! > 0. `ROUTINE_PILOT_BASE_URL` overrides `base_url`. Logs go to stderr and
//! honor `RUST_LOG` (default `info`).

pub mod app;
pub mod commands;
