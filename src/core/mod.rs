//! Core primitives.
//!
//! Reproducible randomness shared by the game and network layers.

pub mod rng;

// Re-export core types
pub use rng::DeterministicRng;
