#![warn(missing_debug_implementations, rust_2018_idioms)]

//! # zigQuant
//!
//! An event-driven algorithmic trading engine: the same `Strategy` code
//! runs unmodified against a live exchange (`zigquant_engine::live::LiveRunner`)
//! or a deterministic historical replay
//! (`zigquant_engine::backtest::BacktestRunner`). This crate is the
//! composition root: it ties `zigquant-core`'s ports to concrete
//! `StateStore` adapters, collects every component error into one
//! [`ZigQuantError`], and exposes [`config::CoreConfig`] as the single
//! document a host deserialises at startup.
//!
//! Grounded on `barter`'s own top-level crate (`barter::error::BarterError`
//! composing every subsystem's error type, `barter::system` wiring the
//! pieces together).

pub mod config;
pub mod state_store;

pub use config::CoreConfig;
pub use state_store::{FileStateStore, InMemoryStateStore};

use thiserror::Error;

/// Composes every subsystem's error type, mirroring
/// `barter::error::BarterError`'s `#[from]`-per-subsystem convention.
#[derive(Debug, Error)]
pub enum ZigQuantError {
    #[error("bus: {0}")]
    Bus(#[from] zigquant_bus::BusError),
    #[error("data: {0}")]
    Data(#[from] zigquant_data::DataError),
    #[error("execution: {0}")]
    Execution(#[from] zigquant_execution::ExecutionError),
    #[error("engine: {0}")]
    Engine(#[from] zigquant_engine::EngineError),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] zigquant_cache::checkpoint::CheckpointError),
    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type ZigQuantResult<T> = Result<T, ZigQuantError>;
