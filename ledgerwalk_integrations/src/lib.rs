//! Remote API gateway implementations for `ledgerwalk_core`.

#[cfg(feature = "eve-api")]
pub mod eve_api;
