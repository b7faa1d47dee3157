// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use dronering_core::domain::order::Order;
use tokio::sync::mpsc;

/// Where an order source pushes incoming orders.
pub type OrderSink = mpsc::UnboundedSender<Order>;

/// Push-style order subscription. Only the master subscribes.
///
/// Starting an already started source redirects it to the new sink; the
/// previous sink stops receiving orders.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn start(&self, sink: OrderSink) -> anyhow::Result<()>;

    async fn stop(&self);
}
