//! # zigquant-core
//!
//! Core entities, fixed-point decimal arithmetic, the event tagged-union,
//! and the port traits the rest of the zigQuant engine is built against.
//!
//! This crate has no dependency on any other zigQuant crate — every other
//! crate in the workspace (`zigquant-bus`, `zigquant-cache`, `zigquant-data`,
//! `zigquant-execution`, `zigquant-engine`) depends on it, the same way
//! `barter-instrument` sits at the bottom of the teacher workspace's
//! dependency graph.

pub mod account;
pub mod decimal;
pub mod error;
pub mod event;
pub mod instrument;
pub mod order;
pub mod ports;
pub mod position;
pub mod topics;

pub use account::{Account, AccountId};
pub use decimal::{FixedDecimal, Price, Quantity};
pub use error::ErrorKind;
pub use event::{Envelope, Event};
pub use instrument::{Instrument, Quote, Symbol};
pub use order::{ClientOrderId, ExchangeOrderId, Order, OrderStatus, OrderType, RejectReason, Side};
pub use ports::{Ack, Clock, DataSource, DataType, ExchangeClient, PortError, PortResult, StateStore};
pub use position::Position;
