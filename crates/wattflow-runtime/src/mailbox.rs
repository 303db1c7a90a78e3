//! Actor mailbox implementation
//!
//! TigerStyle: Two FIFO channels, control always served before data.

use crate::message::Message;
use std::time::Duration;
use tokio::sync::mpsc;

/// Address an actor's mailbox is bound to
pub fn address_for(name: &str) -> String {
    debug_assert!(!name.is_empty(), "actor name must not be empty");
    format!("ipc://@{}", name)
}

/// Outcome of a receive call
#[derive(Debug)]
pub enum Received {
    /// A message from either channel
    Message(Message),
    /// The timeout elapsed with both channels empty
    Timeout,
    /// Both channels are closed and empty
    Closed,
}

/// Sending halves of a mailbox
#[derive(Debug, Clone)]
pub struct MailboxSenders {
    pub control: mpsc::UnboundedSender<Message>,
    pub data: mpsc::UnboundedSender<Message>,
}

/// Receiving side of an actor's two channels
///
/// # TigerStyle
/// - FIFO ordering per channel
/// - Control messages are never starved by data traffic
#[derive(Debug)]
pub struct Mailbox {
    control_rx: mpsc::UnboundedReceiver<Message>,
    data_rx: mpsc::UnboundedReceiver<Message>,
    /// Total messages received (for logging)
    received_count: u64,
}

impl Mailbox {
    /// Create a mailbox and its senders
    pub fn channel() -> (Self, MailboxSenders) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        (
            Self {
                control_rx,
                data_rx,
                received_count: 0,
            },
            MailboxSenders {
                control: control_tx,
                data: data_tx,
            },
        )
    }

    /// Wait for the next message
    ///
    /// When both channels hold a message the control one is returned first.
    /// `None` waits forever.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Received {
        let control_rx = &mut self.control_rx;
        let data_rx = &mut self.data_rx;

        let next = async move {
            tokio::select! {
                biased;
                Some(msg) = control_rx.recv() => Received::Message(msg),
                Some(msg) = data_rx.recv() => Received::Message(msg),
                else => Received::Closed,
            }
        };

        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, next)
                .await
                .unwrap_or(Received::Timeout),
            None => next.await,
        };

        if matches!(received, Received::Message(_)) {
            self.received_count = self.received_count.wrapping_add(1);
        }
        received
    }

    /// Take an already queued data message without waiting
    pub fn try_receive_data(&mut self) -> Option<Message> {
        let msg = self.data_rx.try_recv().ok()?;
        self.received_count = self.received_count.wrapping_add(1);
        Some(msg)
    }

    /// Refuse further sends on both channels
    pub fn close(&mut self) {
        self.control_rx.close();
        self.data_rx.close();
    }

    /// Total messages received so far
    pub fn received_count(&self) -> u64 {
        self.received_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_control_served_before_data() {
        let (mut mailbox, senders) = Mailbox::channel();
        senders.data.send(Message::End { sender: "d".into() }).unwrap();
        senders.control.send(Message::ExitRequest).unwrap();

        match mailbox.receive(None).await {
            Received::Message(Message::ExitRequest) => {}
            other => panic!("expected control message first, got {:?}", other),
        }
        match mailbox.receive(None).await {
            Received::Message(Message::End { .. }) => {}
            other => panic!("expected data message, got {:?}", other),
        }
        assert_eq!(mailbox.received_count(), 2);
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (mut mailbox, _senders) = Mailbox::channel();
        let received = mailbox.receive(Some(Duration::from_millis(10))).await;
        assert!(matches!(received, Received::Timeout));
    }

    #[tokio::test]
    async fn test_fifo_per_channel() {
        let (mut mailbox, senders) = Mailbox::channel();
        for i in 0..3 {
            senders
                .data
                .send(Message::End {
                    sender: i.to_string(),
                })
                .unwrap();
        }
        for i in 0..3 {
            match mailbox.try_receive_data() {
                Some(Message::End { sender }) => assert_eq!(sender, i.to_string()),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(mailbox.try_receive_data().is_none());
    }

    #[tokio::test]
    async fn test_closed_when_senders_dropped() {
        let (mut mailbox, senders) = Mailbox::channel();
        drop(senders);
        assert!(matches!(mailbox.receive(None).await, Received::Closed));
    }

    #[tokio::test]
    async fn test_close_refuses_sends() {
        let (mut mailbox, senders) = Mailbox::channel();
        mailbox.close();
        assert!(senders.control.send(Message::ExitRequest).is_err());
    }

    #[test]
    fn test_address_derived_from_name() {
        assert_eq!(address_for("puller"), "ipc://@puller");
    }
}
