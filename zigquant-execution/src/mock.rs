//! An in-memory [`ExchangeClient`] for tests and the backtest
//! `MatchingEngine` to build on (spec §4.D, §6).
//!
//! Grounded on `barter-execution::simulated::exchange`'s in-process
//! exchange simulator: accept/reject/fill decisions are made synchronously
//! against configured behaviour rather than a real network round trip.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};
use zigquant_core::{
    Price, Quantity, Symbol,
    event::Event,
    order::{ClientOrderId, ExchangeOrderId, OrderStatus, RejectReason, Side},
    ports::{Ack, ExchangeClient, PortError, PortResult},
};

/// Scripted behaviour for [`MockExchangeClient::submit`], configured per
/// test case.
#[derive(Debug, Clone)]
pub enum SubmitBehaviour {
    AcceptAndFillImmediately,
    Accept,
    Reject(RejectReason),
    Timeout,
    /// Accepts, but only after `Duration` has elapsed — models an exchange
    /// that processed the order while the caller's own timeout had already
    /// given up on it.
    AcceptAfterDelay(Duration),
}

struct Tracked {
    exchange_id: ExchangeOrderId,
    status: OrderStatus,
}

pub struct MockExchangeClient {
    behaviour: Mutex<SubmitBehaviour>,
    next_exchange_id: Mutex<u64>,
    orders: Mutex<HashMap<ClientOrderId, Tracked>>,
    events: Mutex<VecDeque<Event>>,
}

impl MockExchangeClient {
    pub fn new(behaviour: SubmitBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            next_exchange_id: Mutex::new(1),
            orders: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_behaviour(&self, behaviour: SubmitBehaviour) {
        *self.behaviour.lock() = behaviour;
    }

    /// Lets a test push a fill/cancel/connection event that
    /// [`ExchangeClient::drain_events`] will later surface, simulating an
    /// asynchronous exchange push.
    pub fn enqueue_event(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    fn allocate_exchange_id(&self) -> ExchangeOrderId {
        let mut next = self.next_exchange_id.lock();
        let id = ExchangeOrderId(format!("mock-{next}"));
        *next += 1;
        id
    }
}

impl ExchangeClient for MockExchangeClient {
    fn submit(
        &self,
        client_id: ClientOrderId,
        _symbol: &Symbol,
        _side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> PortResult<Ack> {
        match self.behaviour.lock().clone() {
            SubmitBehaviour::Reject(reason) => Err(PortError::Rejected(reason)),
            SubmitBehaviour::Timeout => Err(PortError::Timeout),
            SubmitBehaviour::AcceptAfterDelay(delay) => {
                std::thread::sleep(delay);
                let exchange_id = self.allocate_exchange_id();
                self.orders.lock().insert(
                    client_id,
                    Tracked {
                        exchange_id: exchange_id.clone(),
                        status: OrderStatus::Submitted,
                    },
                );
                Ok(Ack {
                    exchange_id,
                    status: OrderStatus::Submitted,
                })
            }
            SubmitBehaviour::Accept | SubmitBehaviour::AcceptAndFillImmediately => {
                let exchange_id = self.allocate_exchange_id();
                let fill_now = matches!(
                    *self.behaviour.lock(),
                    SubmitBehaviour::AcceptAndFillImmediately
                );
                let status = if fill_now {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Submitted
                };
                self.orders.lock().insert(
                    client_id,
                    Tracked {
                        exchange_id: exchange_id.clone(),
                        status: status.clone(),
                    },
                );
                if fill_now {
                    self.events.lock().push_back(Event::OrderFilled {
                        client_id,
                        fill_qty: qty,
                        fill_price: price.unwrap_or(Price::ZERO),
                        timestamp_ns: 0,
                    });
                }
                Ok(Ack { exchange_id, status })
            }
        }
    }

    fn cancel(&self, exchange_id: &ExchangeOrderId) -> PortResult<()> {
        let mut orders = self.orders.lock();
        let Some(tracked) = orders.values_mut().find(|t| &t.exchange_id == exchange_id) else {
            return Err(PortError::NotFound);
        };
        if tracked.status.is_terminal() {
            return Err(PortError::Rejected(RejectReason::Other(
                "order already terminal".into(),
            )));
        }
        tracked.status = OrderStatus::Canceled;
        Ok(())
    }

    fn query(&self, client_id: ClientOrderId) -> PortResult<Ack> {
        self.orders
            .lock()
            .get(&client_id)
            .map(|t| Ack {
                exchange_id: t.exchange_id.clone(),
                status: t.status.clone(),
            })
            .ok_or(PortError::NotFound)
    }

    fn drain_events(&self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }
}
