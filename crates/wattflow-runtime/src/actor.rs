//! Generic actor core
//!
//! TigerStyle: Single-threaded execution per actor, explicit lifecycle,
//! bounded shutdown.
//!
//! Every pipeline stage is an [`Actor`] parameterized by a [`Behavior`]. The
//! core owns the mailbox, the handler table and the lifecycle; the behavior
//! only supplies initialization, message handlers, periodic work and
//! teardown.

use crate::handle::{ActorHandle, Recipient};
use crate::lifecycle::LifecycleState;
use crate::mailbox::{Mailbox, Received};
use crate::message::{Message, MessageKind, StartKind, StartPayload};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use wattflow_core::config::ActorConfig;
use wattflow_core::constants::ACTOR_NAME_LENGTH_BYTES_MAX;
use wattflow_core::error::{Error, Result};

/// Reason sent back when a start handshake hits an initialized actor
pub const ALREADY_INITIALIZED_REASON: &str = "Actor already initialized";

/// Place of an actor in a pipeline, used to order shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActorRole {
    Puller,
    Processor,
    Dispatcher,
    Formula,
    Pusher,
    Generic,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Puller => write!(f, "puller"),
            Self::Processor => write!(f, "processor"),
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Formula => write!(f, "formula"),
            Self::Pusher => write!(f, "pusher"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// What happens when a handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, tear down and stop the actor
    Terminate,
    /// Keep running and send a poison notification to the parent
    NotifyParent,
}

// =============================================================================
// Behavior
// =============================================================================

/// Domain logic plugged into the actor core
#[async_trait]
pub trait Behavior: Send + Sized + 'static {
    /// Pipeline role of the actor
    fn role(&self) -> ActorRole {
        ActorRole::Generic
    }

    /// Start payload kind this behavior accepts
    fn start_kind(&self) -> StartKind {
        StartKind::Generic
    }

    /// Reaction to a failing handler
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Terminate
    }

    /// Idle time after which [`Behavior::on_timeout`] runs
    fn receive_timeout(&self) -> Option<Duration> {
        None
    }

    /// Register message handlers
    fn register_handlers(&self, _table: &mut HandlerTable<Self>) {}

    /// Initialization routine run on the start handshake
    async fn initialize(&mut self, _ctx: &mut ActorContext, _payload: StartPayload) -> Result<()> {
        Ok(())
    }

    /// Periodic work, run when no message arrived within the receive timeout
    async fn on_timeout(&mut self, _ctx: &mut ActorContext) -> Result<()> {
        Ok(())
    }

    /// Cleanup hook, run once before the channels close
    ///
    /// `graceful` is false for a hard kill or after a fatal error.
    async fn teardown(&mut self, _ctx: &mut ActorContext, _graceful: bool) {}
}

/// Handler for one message kind
#[async_trait]
pub trait Handler<B>: Send + Sync {
    async fn handle(&self, behavior: &mut B, ctx: &mut ActorContext, msg: Message) -> Result<()>;
}

/// Message kind to handler mapping
pub struct HandlerTable<B> {
    entries: HashMap<MessageKind, (Arc<dyn Handler<B>>, bool)>,
}

impl<B> HandlerTable<B> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler
    ///
    /// With `include_subtypes`, the handler also serves every kind whose
    /// parent is `kind`, unless that kind has its own handler.
    pub fn add_handler(
        &mut self,
        kind: MessageKind,
        handler: impl Handler<B> + 'static,
        include_subtypes: bool,
    ) {
        if self
            .entries
            .insert(kind, (Arc::new(handler), include_subtypes))
            .is_some()
        {
            debug!(kind = %kind, "Handler replaced");
        }
    }

    /// Find the handler for a message kind
    pub fn lookup(&self, kind: MessageKind) -> Option<Arc<dyn Handler<B>>> {
        if let Some((handler, _)) = self.entries.get(&kind) {
            return Some(handler.clone());
        }
        let parent = kind.parent()?;
        match self.entries.get(&parent) {
            Some((handler, true)) => Some(handler.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<B> Default for HandlerTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ActorContext
// =============================================================================

/// Runtime services available to a behavior
pub struct ActorContext {
    name: String,
    handle: ActorHandle,
    parent: Option<Recipient>,
    state_tx: Arc<watch::Sender<LifecycleState>>,
    alive: bool,
}

impl ActorContext {
    /// Actor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to this actor
    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    /// Control channel of this actor, as a reply address
    pub fn self_recipient(&self) -> Recipient {
        Recipient::new(self.name.clone(), self.handle.control_sender())
    }

    /// Actor that sent the start handshake
    pub fn parent(&self) -> Option<&Recipient> {
        self.parent.as_ref()
    }

    /// Send a message to the parent, if there is one
    pub fn send_parent(&self, msg: Message) -> Result<()> {
        match &self.parent {
            Some(parent) => parent.send(msg),
            None => {
                debug!(actor = %self.name, "No parent to notify");
                Ok(())
            }
        }
    }

    /// Ask this actor to tear down and stop after the current message
    pub fn request_exit(&self) {
        if self.handle.send_control(Message::ExitRequest).is_err() {
            warn!(actor = %self.name, "Exit request refused, mailbox closed");
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Whether the receive loop keeps running
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn transition(&self, next: LifecycleState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "invalid lifecycle transition {} -> {}",
            current,
            next
        );
        self.state_tx.send_replace(next);
        debug!(actor = %self.name, from = %current, to = %next, "Lifecycle transition");
    }
}

/// Publishes `Terminated` however the actor task ends, abort included
struct TerminationGuard {
    state_tx: Arc<watch::Sender<LifecycleState>>,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.state_tx.send_replace(LifecycleState::Terminated);
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Actor core: mailbox, handler table and lifecycle around a behavior
pub struct Actor<B: Behavior> {
    behavior: B,
    mailbox: Mailbox,
    handlers: HandlerTable<B>,
    ctx: ActorContext,
    config: ActorConfig,
    abort: Arc<OnceLock<tokio::task::AbortHandle>>,
    torn_down: bool,
}

impl<B: Behavior> Actor<B> {
    /// Create an actor
    ///
    /// # Errors
    /// Returns `InvalidActorName` if the name is empty, too long or contains
    /// characters outside `[A-Za-z0-9_.:@-]`.
    pub fn new(name: impl Into<String>, behavior: B, config: ActorConfig) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        let (mailbox, senders) = Mailbox::channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::NotStarted);
        let abort = Arc::new(OnceLock::new());
        let handle = ActorHandle::new(name.clone(), senders, state_rx, abort.clone());

        let mut handlers = HandlerTable::new();
        behavior.register_handlers(&mut handlers);

        Ok(Self {
            behavior,
            mailbox,
            handlers,
            ctx: ActorContext {
                name,
                handle,
                parent: None,
                state_tx: Arc::new(state_tx),
                alive: true,
            },
            config,
            abort,
            torn_down: false,
        })
    }

    /// Actor name
    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    /// Pipeline role of the behavior
    pub fn role(&self) -> ActorRole {
        self.behavior.role()
    }

    /// Handle to the actor, valid before and after spawning
    pub fn handle(&self) -> ActorHandle {
        self.ctx.handle.clone()
    }

    /// Register an extra handler on top of the behavior's own
    pub fn add_handler(
        &mut self,
        kind: MessageKind,
        handler: impl Handler<B> + 'static,
        include_subtypes: bool,
    ) {
        self.handlers.add_handler(kind, handler, include_subtypes);
    }

    /// Start the actor on its own task
    pub fn spawn(self) -> ActorHandle {
        let handle = self.handle();
        let abort = self.abort.clone();
        let task = tokio::spawn(self.run());
        if abort.set(task.abort_handle()).is_err() {
            warn!(actor = %handle.name(), "Actor spawned twice");
        }
        handle
    }

    #[instrument(skip(self), fields(actor = %self.ctx.name, role = %self.behavior.role()), level = "info")]
    async fn run(mut self) {
        let _guard = TerminationGuard {
            state_tx: self.ctx.state_tx.clone(),
        };
        debug!("Actor loop starting");

        while self.ctx.alive {
            let timeout = self.behavior.receive_timeout();
            match self.mailbox.receive(timeout).await {
                Received::Message(msg) => self.process(msg).await,
                Received::Timeout => {
                    if self.ctx.state().is_ready() {
                        let result = AssertUnwindSafe(self.behavior.on_timeout(&mut self.ctx))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| Err(panic_to_error(panic)));
                        if let Err(e) = result {
                            self.fail(None, None, e).await;
                        }
                    }
                }
                Received::Closed => break,
            }
        }

        self.mailbox.close();
        if let Err(e) = self.ctx.send_parent(Message::ChildExited {
            name: self.ctx.name.clone(),
        }) {
            debug!(error = %e, "Parent gone before exit notification");
        }
        self.ctx.transition(LifecycleState::Terminated);
        info!(
            received = self.mailbox.received_count(),
            "Actor terminated"
        );
    }

    async fn process(&mut self, msg: Message) {
        match msg {
            Message::Start { payload, reply_to } => self.handle_start(payload, reply_to).await,
            Message::PoisonPill { soft } => self.handle_poison_pill(soft).await,
            Message::ExitRequest => self.shutdown(true).await,
            other => self.dispatch(other).await,
        }
    }

    async fn handle_start(&mut self, payload: StartPayload, reply_to: Recipient) {
        let reply = |msg: Message| {
            if let Err(e) = reply_to.send(msg) {
                warn!(error = %e, "Start reply lost");
            }
        };

        if self.ctx.state() != LifecycleState::NotStarted {
            reply(Message::Error {
                sender: self.ctx.name.clone(),
                reason: ALREADY_INITIALIZED_REASON.to_string(),
            });
            return;
        }

        let expected = self.behavior.start_kind();
        if payload.kind() != expected {
            let err = Error::WrongStartMessage {
                expected: expected.to_string(),
                got: payload.kind().to_string(),
            };
            warn!(error = %err, "Wrong start message");
            reply(Message::Error {
                sender: self.ctx.name.clone(),
                reason: err.to_string(),
            });
            return;
        }

        self.ctx.parent = Some(reply_to.clone());

        self.ctx.transition(LifecycleState::Initializing);
        let result = AssertUnwindSafe(self.behavior.initialize(&mut self.ctx, payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_to_error(panic)));

        match result {
            Ok(()) => {
                self.ctx.transition(LifecycleState::Ready);
                info!("Actor initialized");
                reply(Message::Ok {
                    sender: self.ctx.name.clone(),
                });
            }
            Err(e) => {
                error!(error = %e, "Actor initialization failed");
                reply(Message::Error {
                    sender: self.ctx.name.clone(),
                    reason: e.to_string(),
                });
                self.ctx.request_exit();
            }
        }
    }

    /// Soft pills drain the data channel within the configured bounds first
    async fn handle_poison_pill(&mut self, soft: bool) {
        debug!(soft, "Poison pill received");
        if soft && self.ctx.state().is_ready() {
            let deadline = Instant::now() + self.config.drain_timeout();
            let mut drained = 0usize;
            while self.ctx.alive
                && drained < self.config.drain_messages_max
                && Instant::now() < deadline
            {
                let Some(msg) = self.mailbox.try_receive_data() else {
                    break;
                };
                drained += 1;
                if msg.is_lifecycle() {
                    warn!(kind = %msg.kind(), "Lifecycle message on data channel dropped");
                    continue;
                }
                self.dispatch(msg).await;
            }
            debug!(drained, "Drain phase done");
        }
        self.shutdown(soft).await;
    }

    /// Run teardown once, then leave the receive loop
    async fn shutdown(&mut self, graceful: bool) {
        if !self.torn_down && self.ctx.state().is_ready() {
            self.torn_down = true;
            let teardown = self.behavior.teardown(&mut self.ctx, graceful);
            if AssertUnwindSafe(teardown).catch_unwind().await.is_err() {
                error!("Teardown panicked");
            }
        }
        self.ctx.alive = false;
    }

    async fn dispatch(&mut self, msg: Message) {
        let kind = msg.kind();
        if !self.ctx.state().is_ready() {
            debug!(kind = %kind, "Message before initialization dropped");
            return;
        }

        let Some(handler) = self.handlers.lookup(kind) else {
            let err = Error::UnknownMessageType {
                actor: self.ctx.name.clone(),
                kind: kind.to_string(),
            };
            warn!(error = %err, "Message dropped");
            return;
        };

        let seq = msg.dispatch_seq();
        let result = AssertUnwindSafe(handler.handle(&mut self.behavior, &mut self.ctx, msg))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_to_error(panic)));

        if let Err(e) = result {
            self.fail(Some(kind), seq, e).await;
        }
    }

    async fn fail(&mut self, kind: Option<MessageKind>, seq: Option<u32>, err: Error) {
        match self.behavior.failure_policy() {
            FailurePolicy::NotifyParent => {
                warn!(kind = ?kind, error = %err, "Handler failed");
                if let Some(seq) = seq {
                    let notification = Message::PoisonNotification {
                        sender: self.ctx.name.clone(),
                        seq,
                        detail: err.to_string(),
                    };
                    if let Err(e) = self.ctx.send_parent(notification) {
                        warn!(error = %e, "Poison notification lost");
                    }
                }
            }
            FailurePolicy::Terminate => {
                error!(kind = ?kind, error = %err, "Handler failed, actor stopping");
                self.shutdown(false).await;
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidActorName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if name.len() > ACTOR_NAME_LENGTH_BYTES_MAX {
        return Err(invalid(format!(
            "length {} exceeds limit {}",
            name.len(),
            ACTOR_NAME_LENGTH_BYTES_MAX
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'));
    if !valid {
        return Err(invalid("name contains invalid characters".into()));
    }
    Ok(())
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> Error {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::internal(format!("handler panicked: {}", detail))
}
