// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delivery ordering for one session.
//!
//! A call takes a [`Ticket`] while it holds the stack lock, so ticket order is
//! stack-mutation order. [`Ticket::wait`] resolves once every earlier ticket
//! is dropped. A ticket dropped before its turn (aborted call) is skipped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

#[derive(Debug, Default)]
struct Turns {
    issued: u64,
    serving: u64,
    finished: BTreeSet<u64>,
}

/// Issues tickets and tracks whose turn it is.
#[derive(Debug)]
pub(crate) struct Sequencer {
    turns: Mutex<Turns>,
    serving: watch::Sender<u64>,
}

impl Sequencer {
    pub(crate) fn new() -> Arc<Self> {
        let (serving, _) = watch::channel(0);
        Arc::new(Self {
            turns: Mutex::new(Turns::default()),
            serving,
        })
    }

    pub(crate) fn ticket(self: &Arc<Self>) -> Ticket {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let id = turns.issued;
        turns.issued += 1;
        Ticket {
            seq: Arc::clone(self),
            id,
        }
    }

    fn finish(&self, id: u64) {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.finished.insert(id);
        loop {
            let next = turns.serving;
            if !turns.finished.remove(&next) {
                break;
            }
            turns.serving += 1;
        }
        self.serving.send_replace(turns.serving);
    }
}

/// Place in the delivery queue. Dropping it passes the turn on.
#[derive(Debug)]
pub(crate) struct Ticket {
    seq: Arc<Sequencer>,
    id: u64,
}

impl Ticket {
    /// Suspend until every earlier ticket is dropped.
    pub(crate) async fn wait(&self) {
        let mut rx = self.seq.serving.subscribe();
        // The sender lives in `self.seq`, so the channel cannot close here.
        let _ = rx.wait_for(|serving| *serving >= self.id).await;
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.seq.finish(self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn later_ticket_waits_for_earlier_ones() {
        let seq = Sequencer::new();
        let first = seq.ticket();
        let second = seq.ticket();
        assert_eq!((first.id(), second.id()), (0, 1));

        assert!(timeout(Duration::from_millis(50), second.wait()).await.is_err());
        first.wait().await;
        drop(first);
        timeout(Duration::from_secs(1), second.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_ticket_is_skipped() {
        let seq = Sequencer::new();
        let first = seq.ticket();
        let aborted = seq.ticket();
        let third = seq.ticket();
        drop(aborted);
        assert!(timeout(Duration::from_millis(50), third.wait()).await.is_err());
        drop(first);
        timeout(Duration::from_secs(1), third.wait()).await.unwrap();
    }
}
