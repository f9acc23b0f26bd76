//! Request interception for backstage.
//!
//! This crate provides the network seam, the caching strategies, the
//! precache loader and the `InterceptionLayer` that ties them to one cache
//! store and one lifecycle controller.

pub mod fetch;
pub mod layer;
pub mod precache;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use fetch::{FetchConfig, HttpNetwork, Network};
pub use layer::{InterceptionLayer, LayerStatus};
pub use precache::{PrecacheLoader, PrecacheReport};
pub use strategy::{CacheTarget, ResponseSource, StrategyEngine, StrategyOutcome};
