//! Actor handles and recipients
//!
//! TigerStyle: Location-transparent references with explicit error handling.

use crate::lifecycle::LifecycleState;
use crate::mailbox::{address_for, MailboxSenders};
use crate::message::Message;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use wattflow_core::error::{Error, Result};

/// One channel of a named actor
///
/// Used as the reply address of a start handshake and as an actor's parent.
#[derive(Clone)]
pub struct Recipient {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl Recipient {
    /// Create a recipient from a name and a channel sender
    pub fn new(name: impl Into<String>, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Name of the actor behind this recipient
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a message
    ///
    /// # Errors
    /// Returns `ChannelClosed` if the receiving side is gone.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::channel_closed(&self.name, "recipient"))
    }
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipient").field("name", &self.name).finish()
    }
}

/// Handle to an actor
///
/// Owned by whoever created the actor and cloned to collaborators that need
/// to send to it. The handle never exposes the actor's state, only its
/// lifecycle.
#[derive(Clone)]
pub struct ActorHandle {
    name: String,
    address: String,
    senders: MailboxSenders,
    state_rx: watch::Receiver<LifecycleState>,
    abort: Arc<OnceLock<AbortHandle>>,
}

impl ActorHandle {
    pub(crate) fn new(
        name: String,
        senders: MailboxSenders,
        state_rx: watch::Receiver<LifecycleState>,
        abort: Arc<OnceLock<AbortHandle>>,
    ) -> Self {
        let address = address_for(&name);
        Self {
            name,
            address,
            senders,
            state_rx,
            abort,
        }
    }

    /// Actor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the actor's mailbox is bound to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    /// Check if the actor task is running
    pub fn is_alive(&self) -> bool {
        self.abort.get().is_some() && self.state() != LifecycleState::Terminated
    }

    /// Open the data channel for sending
    ///
    /// # Errors
    /// Returns `ChannelClosed` if the actor already terminated.
    pub fn connect_data(&self) -> Result<Recipient> {
        self.connect(&self.senders.data, "data")
    }

    /// Open the control channel for sending
    ///
    /// # Errors
    /// Returns `ChannelClosed` if the actor already terminated.
    pub fn connect_control(&self) -> Result<Recipient> {
        self.connect(&self.senders.control, "control")
    }

    fn connect(&self, tx: &mpsc::UnboundedSender<Message>, channel: &str) -> Result<Recipient> {
        if self.state() == LifecycleState::Terminated || tx.is_closed() {
            return Err(Error::channel_closed(&self.name, channel));
        }
        Ok(Recipient::new(self.name.clone(), tx.clone()))
    }

    pub(crate) fn control_sender(&self) -> mpsc::UnboundedSender<Message> {
        self.senders.control.clone()
    }

    /// Send a message on the data channel
    pub fn send_data(&self, msg: Message) -> Result<()> {
        self.senders
            .data
            .send(msg)
            .map_err(|_| Error::channel_closed(&self.name, "data"))
    }

    /// Send a message on the control channel
    pub fn send_control(&self, msg: Message) -> Result<()> {
        self.senders
            .control
            .send(msg)
            .map_err(|_| Error::channel_closed(&self.name, "control"))
    }

    /// Send a poison pill on the control channel
    pub fn kill(&self, soft: bool) -> Result<()> {
        self.send_control(Message::PoisonPill { soft })
    }

    /// Stop the actor task immediately, without teardown
    pub fn abort(&self) {
        if let Some(handle) = self.abort.get() {
            handle.abort();
        }
    }

    /// Wait until the actor is past its start handshake
    ///
    /// Returns true if the actor is `Ready` when the wait ends.
    pub async fn wait_started(&self, timeout: Duration) -> bool {
        let mut state_rx = self.state_rx.clone();
        let started = state_rx.wait_for(|state| {
            matches!(state, LifecycleState::Ready | LifecycleState::Terminated)
        });
        let ready = matches!(
            tokio::time::timeout(timeout, started).await,
            Ok(Ok(state)) if state.is_ready()
        );
        ready
    }

    /// Wait until the actor reaches `Terminated`
    ///
    /// # Errors
    /// Returns `JoinTimeout` if `timeout` elapses first.
    pub async fn wait_terminated(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        let terminated = async move {
            // An error means the state sender is gone, which only happens
            // once the actor is dropped.
            let _ = state_rx
                .wait_for(|state| *state == LifecycleState::Terminated)
                .await;
        };

        match timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, terminated)
                    .await
                    .map_err(|_| Error::JoinTimeout {
                        actor: self.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
            }
            None => {
                terminated.await;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
