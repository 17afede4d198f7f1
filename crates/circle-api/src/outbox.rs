use tracing::debug;

use circle_gateway::Hub;
use circle_types::events::Envelope;

/// Real-time events produced while a write transaction runs. Flushed to the
/// hub once the transaction has committed.
#[derive(Default)]
pub struct Outbox {
    pending: Vec<(Vec<i64>, Envelope)>,
}

impl Outbox {
    pub fn push<I>(&mut self, targets: I, envelope: Envelope)
    where
        I: IntoIterator<Item = i64>,
    {
        let targets: Vec<i64> = targets.into_iter().collect();
        if !targets.is_empty() {
            self.pending.push((targets, envelope));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Deliver queued events in the order they were pushed.
    pub async fn flush(self, hub: &Hub) {
        for (targets, envelope) in self.pending {
            let delivered = hub.send_to_users(targets, &envelope).await;
            debug!("Outbox delivered event to {} connection(s)", delivered);
        }
    }
}
