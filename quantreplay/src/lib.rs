#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! # QuantReplay
//!
//! A deterministic, event-driven backtesting engine for high-frequency market-making and
//! limit-order strategies. It replays recorded Level-2 order book and trade feeds tick by tick,
//! accounting for feed and order entry/response latency and order queue position, so a strategy
//! exercised against this engine sees close to what it would have seen live.
//!
//! ## Key features
//! - Tick-by-tick replay driven by the timestamps embedded in the feed itself, not a fixed
//!   interval.
//! - Full order book reconstruction from Level-2 (market-by-price) feed data.
//! - Feed and order latency modeling, using the provided models or a custom [`LatencyModel`].
//! - Order fill simulation accounting for queue position, using the provided models or a custom
//!   [`QueueModel`].
//! - Multi-asset backtesting, with each asset independently replayed and latency-modeled.
//!
//! [`LatencyModel`]: crate::backtest::models::LatencyModel
//! [`QueueModel`]: crate::backtest::models::QueueModel

/// Provides backtesting features.
pub mod backtest;

/// Provides market depth implementations.
pub mod depth;

/// Defines the engine's core types.
pub mod types;

/// Provides commonly used types, re-exported for convenient `use quantreplay::prelude::*;`.
pub mod prelude;

/// Provides utilities.
mod utils;
