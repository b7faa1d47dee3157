// SPDX-License-Identifier: AGPL-3.0
//! Order sources: one driven by code, one generating random orders on a timer.

use crate::domain::order_source::{OrderSink, OrderSource};
use async_trait::async_trait;
use dronering_core::domain::order::Order;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Orders pushed by hand. Orders pushed while no master listens are kept and
/// handed over on the next `start`.
#[derive(Default)]
pub struct ManualOrderSource {
    sink: Mutex<Option<OrderSink>>,
    backlog: Mutex<VecDeque<Order>>,
}

impl ManualOrderSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, order: Order) {
        let mut sink = self.sink.lock();
        let undelivered = match sink.as_ref() {
            Some(tx) => tx.send(order).err().map(|e| e.0),
            None => Some(order),
        };
        if let Some(order) = undelivered {
            debug!(order = %order.id, "no subscriber, keeping order in backlog");
            *sink = None;
            self.backlog.lock().push_back(order);
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}

#[async_trait]
impl OrderSource for ManualOrderSource {
    async fn start(&self, sink: OrderSink) -> anyhow::Result<()> {
        let mut current = self.sink.lock();
        let mut backlog = self.backlog.lock();
        while let Some(order) = backlog.pop_front() {
            if let Err(e) = sink.send(order) {
                backlog.push_front(e.0);
                anyhow::bail!("order sink closed while flushing the backlog");
            }
        }
        *current = Some(sink);
        Ok(())
    }

    async fn stop(&self) {
        self.sink.lock().take();
    }
}

/// Random orders on a fixed interval, ids increasing from 1.
pub struct PeriodicOrderSource {
    interval: Duration,
    next_id: Arc<AtomicU64>,
    running: Mutex<Option<CancellationToken>>,
}

impl PeriodicOrderSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_id: Arc::new(AtomicU64::new(1)),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl OrderSource for PeriodicOrderSource {
    async fn start(&self, sink: OrderSink) -> anyhow::Result<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.running.lock().replace(token.clone()) {
            previous.cancel();
        }

        let next_id = Arc::clone(&self.next_id);
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval = ?self.interval, "Order generator started");
        tokio::spawn(async move {
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let order = Order::random(next_id.fetch_add(1, Ordering::SeqCst));
                        debug!(%order, "generated order");
                        if sink.send(order).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
            info!("Order generator stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronering_core::domain::geo::CityPoint;
    use tokio::sync::mpsc;

    fn order(id: u64) -> Order {
        Order::new(id, CityPoint::CHARGING_BAY, CityPoint::CHARGING_BAY)
    }

    #[tokio::test]
    async fn test_manual_source_backlog_flushes_on_start() {
        let source = ManualOrderSource::new();
        source.push(order(1));
        source.push(order(2));
        assert_eq!(source.backlog_len(), 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.start(tx).await.unwrap();
        source.push(order(3));

        let ids: Vec<u64> = vec![
            rx.recv().await.unwrap().id.0,
            rx.recv().await.unwrap().id.0,
            rx.recv().await.unwrap().id.0,
        ];
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(source.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_manual_source_keeps_orders_after_stop() {
        let source = ManualOrderSource::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        source.start(tx).await.unwrap();
        source.stop().await;
        source.push(order(7));
        assert_eq!(source.backlog_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_source_ids_increase_across_restarts() {
        let source = PeriodicOrderSource::new(Duration::from_secs(1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.start(tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id.0, 1);
        assert_eq!(rx.recv().await.unwrap().id.0, 2);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        source.start(tx2).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap().id.0, 3);
        // the first subscription was cancelled
        assert!(rx.recv().await.is_none());

        source.stop().await;
        assert!(rx2.recv().await.is_none());
    }
}
