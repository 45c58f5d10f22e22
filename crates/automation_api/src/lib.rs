//! Transport-only primitives for the routine automation backend.
//!
//! This crate owns request building, header construction, URL joining and
//! response decoding for the backend's HTTP surface. It intentionally contains
//! no credential lifecycle, refresh policy or task bookkeeping; those live in
//! `routine_pilot`, which drives this crate through the [`Transport`] seam.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod transport;
pub mod url;

pub use client::AutomationApiClient;
pub use config::AutomationApiConfig;
pub use error::AutomationApiError;
pub use payload::{ApiRequest, ApiResponse, Method};
pub use transport::Transport;
pub use url::{join_endpoint, normalize_base_url};

pub use reqwest::StatusCode;
