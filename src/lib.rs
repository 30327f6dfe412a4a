//! Keybroker Library
//!
//! Authorization caching proxy and split-key private-key assembly for
//! confidential workloads.
//!
//! # Features
//!
//! - **Single-Flight Authorization**: per-credential response cache with at
//!   most one wire authorization in flight per fingerprint
//! - **Auto-Expiring Cache**: TTL'd concurrent map with a two-phase,
//!   hook-gated eviction protocol
//! - **Split-Key Assembly**: encrypted key shares fetched from independent
//!   vending endpoints, KMS-decrypted, and XOR-folded into one private key
//! - **Uniform Async Contexts**: request/response carriers with single-fire
//!   callbacks and propagated trace identifiers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod proxy;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
