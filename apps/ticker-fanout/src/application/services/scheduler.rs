//! Broadcast Scheduler
//!
//! Fires on a fixed period and hands the coalesced snapshot to the client
//! fan-out. The tick itself does no I/O: the fan-out only enqueues onto
//! per-session queues, so a slow client never delays the timer.
//!
//! # Batch Gate
//!
//! A lost link holds the [`BatchGate`] from the moment the connector retires
//! the episode until the dispatcher has fanned out the disconnect status.
//! Ticks that land in that window send nothing and leave the buffer intact,
//! so the status reaches clients ahead of any later batch even when the
//! event channel is backed up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ClientFanout;
use crate::domain::streaming::coalescer::UpdateCoalescer;

/// Default broadcast period (4 Hz).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Counts disconnect notices that are retired but not yet broadcast.
#[derive(Debug, Default)]
pub struct BatchGate {
    pending: Mutex<u64>,
}

impl BatchGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a disconnect notice that must go out before the next batch.
    pub fn hold(&self) {
        *self.pending.lock() += 1;
    }

    /// Mark one pending notice as broadcast.
    pub fn release(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
    }

    /// Whether batches may be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.pending.lock() == 0
    }

    /// Run `f` while no notice is pending. The gate stays locked for the
    /// duration, so a concurrent `hold` waits for the batch to be enqueued.
    pub fn run_if_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let pending = self.pending.lock();
        if *pending > 0 {
            return None;
        }
        let result = f();
        drop(pending);
        Some(result)
    }
}

/// Periodic coalescer flush into the client fan-out.
pub struct BroadcastScheduler {
    coalescer: Arc<UpdateCoalescer>,
    fanout: Arc<dyn ClientFanout>,
    gate: Arc<BatchGate>,
    period: Duration,
}

impl BroadcastScheduler {
    /// Create a scheduler with the given period.
    #[must_use]
    pub fn new(
        coalescer: Arc<UpdateCoalescer>,
        fanout: Arc<dyn ClientFanout>,
        gate: Arc<BatchGate>,
        period: Duration,
    ) -> Self {
        Self {
            coalescer,
            fanout,
            gate,
            period,
        }
    }

    /// Broadcast period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Run one tick.
    ///
    /// Returns the number of sessions reached, or `None` when the buffer
    /// was empty or the gate was held and nothing was sent.
    pub fn tick(&self) -> Option<usize> {
        let sent = self.gate.run_if_open(|| {
            if self.coalescer.is_empty() {
                return None;
            }

            let batch = self.coalescer.flush();
            let reached = self.fanout.broadcast_batch(&batch);
            tracing::trace!(updates = batch.len(), sessions = reached, "Broadcast tick");
            Some(reached)
        });

        match sent {
            Some(reached) => reached,
            None => {
                tracing::trace!("Broadcast tick held for pending status");
                None
            }
        }
    }

    /// Tick every period until cancelled.
    ///
    /// The first tick fires one full period after start. An in-flight tick
    /// always completes before cancellation is observed.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        tracing::debug!(period_ms = self.period.as_millis(), "Broadcast scheduler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        tracing::debug!("Broadcast scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockClientFanout;
    use crate::domain::streaming::{ConnectionStatus, EventType, Ohlcv, TickerUpdate};

    fn update(symbol: &str) -> TickerUpdate {
        TickerUpdate::from_aggregate(
            symbol,
            EventType::Minute,
            Ohlcv {
                open: dec!(10),
                high: dec!(11),
                low: dec!(9),
                close: dec!(10.5),
                volume: dec!(100),
            },
            None,
            None,
        )
        .unwrap()
    }

    /// Records every batch it is handed.
    #[derive(Default)]
    struct RecordingFanout {
        batches: Mutex<Vec<Vec<TickerUpdate>>>,
    }

    impl ClientFanout for RecordingFanout {
        fn broadcast_batch(&self, updates: &[TickerUpdate]) -> usize {
            self.batches.lock().push(updates.to_vec());
            1
        }

        fn broadcast_status(&self, _status: &ConnectionStatus) -> usize {
            1
        }

        fn client_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn empty_buffer_sends_nothing() {
        let mut fanout = MockClientFanout::new();
        fanout.expect_broadcast_batch().times(0);

        let scheduler = BroadcastScheduler::new(
            Arc::new(UpdateCoalescer::new()),
            Arc::new(fanout),
            Arc::new(BatchGate::new()),
            DEFAULT_TICK_INTERVAL,
        );

        assert_eq!(scheduler.tick(), None);
    }

    #[test]
    fn tick_sends_full_snapshot() {
        let coalescer = Arc::new(UpdateCoalescer::new());
        coalescer.add(update("AAPL"));
        coalescer.add(update("MSFT"));

        let mut fanout = MockClientFanout::new();
        fanout
            .expect_broadcast_batch()
            .withf(|updates| updates.len() == 2 && updates[0].symbol == "AAPL")
            .times(1)
            .return_const(3_usize);

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&coalescer),
            Arc::new(fanout),
            Arc::new(BatchGate::new()),
            DEFAULT_TICK_INTERVAL,
        );

        assert_eq!(scheduler.tick(), Some(3));
        assert_eq!(coalescer.len(), 2);
    }

    #[test]
    fn held_gate_defers_batch_until_released() {
        let coalescer = Arc::new(UpdateCoalescer::new());
        coalescer.add(update("AAPL"));
        let fanout = Arc::new(RecordingFanout::default());
        let gate = Arc::new(BatchGate::new());

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&coalescer),
            Arc::clone(&fanout) as Arc<dyn ClientFanout>,
            Arc::clone(&gate),
            DEFAULT_TICK_INTERVAL,
        );

        gate.hold();
        gate.hold();
        assert_eq!(scheduler.tick(), None);
        gate.release();
        assert_eq!(scheduler.tick(), None);
        assert!(fanout.batches.lock().is_empty());
        assert_eq!(coalescer.len(), 1);

        gate.release();
        assert!(gate.is_open());
        assert_eq!(scheduler.tick(), Some(1));
        assert_eq!(fanout.batches.lock().len(), 1);
    }

    #[test]
    fn release_on_open_gate_stays_open() {
        let gate = BatchGate::new();
        gate.release();
        assert!(gate.is_open());

        gate.hold();
        assert!(!gate.is_open());
        assert_eq!(gate.run_if_open(|| 1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_one_tick_becomes_one_batch() {
        let coalescer = Arc::new(UpdateCoalescer::new());
        let fanout = Arc::new(RecordingFanout::default());
        let cancel = CancellationToken::new();

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&coalescer),
            Arc::clone(&fanout) as Arc<dyn ClientFanout>,
            Arc::new(BatchGate::new()),
            DEFAULT_TICK_INTERVAL,
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..10 {
            coalescer.add(update(&format!("SYM{i}")));
            coalescer.add(update(&format!("SYM{i}")));
        }
        assert!(fanout.batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;

        {
            let batches = fanout.batches.lock();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 10);
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_resends_latest_state() {
        let coalescer = Arc::new(UpdateCoalescer::new());
        coalescer.add(update("AAPL"));
        let fanout = Arc::new(RecordingFanout::default());
        let cancel = CancellationToken::new();

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&coalescer),
            Arc::clone(&fanout) as Arc<dyn ClientFanout>,
            Arc::new(BatchGate::new()),
            DEFAULT_TICK_INTERVAL,
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(760)).await;
        cancel.cancel();
        handle.await.unwrap();

        let batches = fanout.batches.lock();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_scheduler_stops_ticking() {
        let coalescer = Arc::new(UpdateCoalescer::new());
        coalescer.add(update("AAPL"));
        let fanout = Arc::new(RecordingFanout::default());
        let cancel = CancellationToken::new();

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&coalescer),
            Arc::clone(&fanout) as Arc<dyn ClientFanout>,
            Arc::new(BatchGate::new()),
            DEFAULT_TICK_INTERVAL,
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(fanout.batches.lock().is_empty());
    }
}
