//! Live-mode ingestion: one worker thread per [`DataSource`] feeding a
//! bounded MPMC queue (spec §4.C "Live mode").
//!
//! Grounded on `barter-data::streams::reconnect`'s per-exchange worker
//! task pattern, adapted from its `tokio` task model to a plain OS thread
//! per source since this crate's `DataSource` port is synchronous
//! (`fn next(&mut self) -> Option<Event>`), matching `barter/src/data/live.rs`'s
//! blocking `Feed` pull loop rather than barter-data's async stream.

use crossbeam::channel::{Receiver, Sender, bounded};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use zigquant_core::{event::Event, ports::DataSource};

const IDLE_POLL: Duration = Duration::from_millis(5);

/// A live event tagged with the instant (in engine nanoseconds, per the
/// host's clock) it arrived at the queue — used to stamp events whose
/// source did not supply its own timestamp (spec §4.C: "timestamps with
/// the system clock if the source did not").
pub struct Arrived {
    pub event: Event,
    pub arrival_ns: i64,
}

pub struct LiveFeed {
    receiver: Receiver<Arrived>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl LiveFeed {
    /// Spawns one worker thread per source, each pushing into a shared
    /// bounded channel of capacity `capacity`. `now_ns` is called from the
    /// worker thread so live stamping never needs the caller's clock to be
    /// `Sync` across threads — only `Fn() -> i64 + Send + Sync`.
    pub fn spawn(
        sources: Vec<Box<dyn DataSource>>,
        capacity: usize,
        now_ns: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let (tx, rx): (Sender<Arrived>, Receiver<Arrived>) = bounded(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = sources
            .into_iter()
            .map(|mut source| {
                let tx = tx.clone();
                let shutdown = shutdown.clone();
                let now_ns = now_ns.clone();
                thread::spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        match source.next() {
                            Some(event) => {
                                let arrived = Arrived {
                                    event,
                                    arrival_ns: now_ns(),
                                };
                                if tx.send(arrived).is_err() {
                                    break;
                                }
                            }
                            None => thread::sleep(IDLE_POLL),
                        }
                    }
                    source.close();
                })
            })
            .collect();

        Self {
            receiver: rx,
            handles,
            shutdown,
        }
    }

    /// Non-blocking pull; `None` means the queue is momentarily empty, not
    /// that the feed has ended.
    pub fn try_recv(&self) -> Option<Arrived> {
        self.receiver.try_recv().ok()
    }

    /// Signals every worker thread to stop and joins them (spec §4.C
    /// `stop()` is race-safe with `start()`).
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use zigquant_core::{
        Price, Quantity, Symbol,
        event::Trade,
        order::Side,
        ports::{DataType, PortResult},
    };

    struct OnceSource {
        yielded: bool,
        symbol: Symbol,
    }

    impl DataSource for OnceSource {
        fn subscribe(&mut self, _symbol: &Symbol, _data_types: &[DataType]) -> PortResult<()> {
            Ok(())
        }
        fn next(&mut self) -> Option<Event> {
            if self.yielded {
                return None;
            }
            self.yielded = true;
            Some(Event::Trade(Trade {
                symbol: self.symbol.clone(),
                price: Price::from(dec!(1)),
                qty: Quantity::from(dec!(1)),
                side: Side::Buy,
                timestamp_ns: 0,
            }))
        }
        fn close(&mut self) {}
    }

    #[test]
    fn delivers_the_single_event_then_stays_empty() {
        let source = OnceSource {
            yielded: false,
            symbol: Symbol::new("BTC-USD"),
        };
        let feed = LiveFeed::spawn(vec![Box::new(source)], 8, Arc::new(|| 42));

        let mut received = None;
        for _ in 0..200 {
            if let Some(arrived) = feed.try_recv() {
                received = Some(arrived);
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let arrived = received.expect("event delivered within timeout");
        assert_eq!(arrived.arrival_ns, 42);
        feed.stop();
    }
}
