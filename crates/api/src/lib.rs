//! Async client for the Dataverse native API.
//!
//! Covers the five wire contracts the transfer engine needs: dataset
//! metadata, file listing, lock status, proxied upload, and the
//! direct-to-storage upload flow (ticket, part PUTs, completion,
//! registration). Status-code-to-error mapping happens in exactly one
//! place so the engine can classify failures uniformly.

mod client;
mod error;
pub mod types;

pub use client::{ApiClient, ApiClientConfig, ChunkObserver};
pub use error::ApiError;
