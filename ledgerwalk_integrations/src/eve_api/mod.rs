//! HTTP gateway for the game's account API (JSON rendition).
//!
//! Wallet pages are requested with `rowCount` and walked backwards with
//! `fromID`. Every response carries `cachedUntil`, which becomes the page's
//! cache hint.

mod client;
pub mod errors;
mod wire;

pub use client::{DEFAULT_BASE_URL, GatewayConfig, HttpApiGateway};
