//! Ticket line serializing access to the exclusive resource.
//!
//! Tickets are issued in submission order and served strictly in that
//! order. A ticket counts as served once it is dropped, whether or not its
//! holder ever got its turn, so an abandoned job never stalls the line.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

#[derive(Debug)]
struct LineState {
    next: u64,
    serving: u64,
    done: BTreeSet<u64>,
}

/// FIFO line of tickets.
#[derive(Debug)]
pub struct TicketLine {
    state: Mutex<LineState>,
    serving_tx: watch::Sender<u64>,
}

impl TicketLine {
    pub fn new() -> Arc<Self> {
        let (serving_tx, _rx) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(LineState {
                next: 0,
                serving: 0,
                done: BTreeSet::new(),
            }),
            serving_tx,
        })
    }

    /// Take the next ticket.
    pub fn issue(self: &Arc<Self>) -> Ticket {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let number = state.next;
        state.next += 1;
        Ticket {
            number,
            line: Arc::clone(self),
        }
    }

    #[cfg(test)]
    fn serving(&self) -> u64 {
        *self.serving_tx.borrow()
    }

    /// Tickets issued and not yet served, including the one being served.
    pub fn waiting(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.next - state.serving
    }

    async fn wait_turn(&self, number: u64) {
        let mut rx = self.serving_tx.subscribe();
        // The sender lives in `self`, so this only ends once the turn comes.
        let _ = rx.wait_for(|serving| *serving >= number).await;
    }

    fn complete(&self, number: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.done.insert(number);
        loop {
            let head = state.serving;
            if !state.done.remove(&head) {
                break;
            }
            state.serving += 1;
        }
        self.serving_tx.send_replace(state.serving);
    }
}

/// A place in the [`TicketLine`]. Dropping it releases the place.
#[derive(Debug)]
pub struct Ticket {
    number: u64,
    line: Arc<TicketLine>,
}

impl Ticket {
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Wait until every earlier ticket has been served.
    pub async fn wait_turn(&self) {
        self.line.wait_turn(self.number).await;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.line.complete(self.number);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn tickets_are_served_in_issue_order() {
        let line = TicketLine::new();
        let first = line.issue();
        let second = line.issue();
        assert_eq!(line.waiting(), 2);

        let waiter = tokio::spawn(async move {
            second.wait_turn().await;
            second.number()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.wait_turn().await;
        drop(first);
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(line.serving(), 2);
        assert_eq!(line.waiting(), 0);
    }

    #[tokio::test]
    async fn abandoned_ticket_does_not_block_line() {
        let line = TicketLine::new();
        let first = line.issue();
        let abandoned = line.issue();
        let third = line.issue();

        drop(abandoned);
        assert_eq!(line.serving(), 0);

        drop(first);
        assert_eq!(line.serving(), 2);

        tokio::time::timeout(Duration::from_secs(1), third.wait_turn())
            .await
            .expect("third ticket should be served");
    }
}
