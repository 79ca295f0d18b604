//! Change notifications for observers of a session (UI bindings, the
//! broadcast layer, tools).

use log::trace;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::model::{EdgeId, VertexId};
use crate::transaction::{TxnId, TxnStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    VertexUpserted(VertexId),
    VertexRemoved(VertexId),
    EdgeUpserted(EdgeId),
    EdgeRemoved(EdgeId),
    VertexRekeyed { from: VertexId, to: VertexId },
    EdgeRekeyed { from: EdgeId, to: EdgeId },
    TransactionChanged { txn: TxnId, status: TxnStatus },
}

/// Fan-out to any number of subscribers. Dropped receivers are pruned on
/// the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<GraphEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: GraphEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        trace!("event {event:?}");
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
