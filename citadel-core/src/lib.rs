//! Shared primitives for the Citadel crates.
//!
//! - [`canonical`] - deterministic JSON encoding and SHA-256 digests, used for
//!   audit entry hashes and cache keys
//! - [`PeriodicTask`] - restartable interval runner for background sweeps

pub mod canonical;
pub mod periodic;

pub use canonical::CanonicalError;
pub use periodic::PeriodicTask;
