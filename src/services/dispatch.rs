//! Worker-side batch dispatch.
//!
//! Each delivery gets a fresh lease, its own time budget and an immediate
//! ack or release, so a slow or failing message never costs its siblings
//! their settlement.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::services::processor::{JobProcessor, MessageOutcome};
use crate::services::queue::{Delivery, LeaseQueue, QueueError, ReleaseOutcome};

/// How a delivery left the worker's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Released(ReleaseOutcome),
    /// The lease was reclaimed before processing began; another receive owns
    /// the message now.
    Abandoned,
    /// A queue call failed. The lease will expire and the reclaimer returns
    /// the message.
    Unsettled,
}

pub struct BatchDispatcher {
    queue: Arc<dyn LeaseQueue>,
    processor: Arc<JobProcessor>,
    time_budget: Duration,
}

impl BatchDispatcher {
    pub fn new(queue: Arc<dyn LeaseQueue>, processor: Arc<JobProcessor>, time_budget: Duration) -> Self {
        Self {
            queue,
            processor,
            time_budget,
        }
    }

    /// Process and settle deliveries one after another.
    pub async fn dispatch(&self, deliveries: &[Delivery]) -> Vec<Settlement> {
        let mut settlements = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            let settlement = match self.dispatch_one(delivery).await {
                Ok(settlement) => settlement,
                Err(e) => {
                    tracing::error!(
                        message_id = %delivery.message_id,
                        error = %e,
                        "Failed to settle delivery, leaving it to lease expiry"
                    );
                    Settlement::Unsettled
                }
            };
            settlements.push(settlement);
        }
        settlements
    }

    async fn dispatch_one(&self, delivery: &Delivery) -> Result<Settlement, QueueError> {
        // Earlier deliveries in the batch ate into this lease.
        if !self.queue.renew(delivery).await? {
            tracing::warn!(
                message_id = %delivery.message_id,
                "Lease expired while waiting in the batch, skipping"
            );
            return Ok(Settlement::Abandoned);
        }

        let outcome = match timeout(self.time_budget, self.processor.handle_delivery(delivery)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                metrics::counter!("pipeline_jobs_timed_out_total").increment(1);
                tracing::error!(
                    message_id = %delivery.message_id,
                    receive_count = delivery.receive_count,
                    budget_secs = self.time_budget.as_secs(),
                    "Delivery exceeded its time budget and was abandoned"
                );
                return self.release(delivery).await;
            }
        };

        self.settle(delivery, &outcome).await
    }

    async fn settle(&self, delivery: &Delivery, outcome: &MessageOutcome) -> Result<Settlement, QueueError> {
        if outcome.should_ack() {
            self.queue.ack(delivery).await?;
            return Ok(Settlement::Acked);
        }
        self.release(delivery).await
    }

    async fn release(&self, delivery: &Delivery) -> Result<Settlement, QueueError> {
        let released = self.queue.release(delivery).await?;
        match released {
            ReleaseOutcome::Requeued => tracing::info!(
                message_id = %delivery.message_id,
                receive_count = delivery.receive_count,
                "Job released for redelivery"
            ),
            ReleaseOutcome::DeadLettered => tracing::warn!(
                message_id = %delivery.message_id,
                receive_count = delivery.receive_count,
                "Job exceeded its receive limit and was dead-lettered"
            ),
            ReleaseOutcome::LeaseLost => tracing::warn!(
                message_id = %delivery.message_id,
                "Lease expired before release; message was already reclaimed"
            ),
        }
        Ok(Settlement::Released(released))
    }
}

/// Worker shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self(receiver)
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Sleep for `period`, waking early on shutdown. If the sender is gone
    /// nothing can signal anymore, so the full period is slept.
    pub async fn idle(&mut self, period: Duration) {
        let nap = sleep(period);
        tokio::pin!(nap);
        tokio::select! {
            _ = &mut nap => {}
            changed = self.0.changed() => {
                if changed.is_err() {
                    nap.await;
                }
            }
        }
    }
}
