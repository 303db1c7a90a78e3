//! Actor supervision
//!
//! TigerStyle: Fail-fast startup, explicit handshake timeout, ordered shutdown.
//!
//! A [`Supervisor`] launches actors with a start handshake and tears them
//! down. [`PipelineSupervisor`] adds the shutdown order a pipeline needs: a
//! consumer is only stopped once every producer upstream of it has stopped,
//! so no in-flight report is dropped.

use crate::actor::{Actor, ActorRole, Behavior};
use crate::handle::{ActorHandle, Recipient};
use crate::message::{Message, StartPayload};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use wattflow_core::config::SupervisorConfig;
use wattflow_core::error::{Error, Result, INIT_NO_REPLY_REASON};

/// Order in which roles are stopped
const SHUTDOWN_ORDER: [ActorRole; 6] = [
    ActorRole::Puller,
    ActorRole::Processor,
    ActorRole::Dispatcher,
    ActorRole::Formula,
    ActorRole::Pusher,
    ActorRole::Generic,
];

#[derive(Debug, Clone)]
struct Supervised {
    handle: ActorHandle,
    role: ActorRole,
}

/// Launches and stops a set of actors
///
/// Supervised actors report to the supervisor's inbox: start replies, `End`
/// notifications and child exits.
pub struct Supervisor {
    name: String,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox_rx: mpsc::UnboundedReceiver<Message>,
    supervised: Vec<Supervised>,
    /// Inbox messages received while waiting for a start reply
    pending_events: Vec<Message>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            inbox_tx,
            inbox_rx,
            supervised: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    /// Reply address handed to launched actors
    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.name.clone(), self.inbox_tx.clone())
    }

    /// Launch an actor with a generic start handshake
    pub async fn launch_actor<B: Behavior>(
        &mut self,
        actor: Actor<B>,
        send_start: bool,
        init_timeout: Duration,
    ) -> Result<ActorHandle> {
        let payload = send_start.then_some(StartPayload::Generic);
        self.launch_actor_with_payload(actor, payload, init_timeout)
            .await
    }

    /// Launch an actor, optionally with a start handshake
    ///
    /// # Errors
    /// - `ActorAlreadySupervised` if an actor with the same name is supervised
    /// - `InitializationFailed` if the actor answers with an error, or does
    ///   not answer within `init_timeout`; the actor is force-killed
    /// - `ChannelClosed` if the actor's channels cannot be opened
    #[instrument(skip(self, actor, payload), fields(actor = %actor.name()), level = "info")]
    pub async fn launch_actor_with_payload<B: Behavior>(
        &mut self,
        actor: Actor<B>,
        payload: Option<StartPayload>,
        init_timeout: Duration,
    ) -> Result<ActorHandle> {
        let name = actor.name().to_string();
        if self.is_supervised(&name) {
            return Err(Error::ActorAlreadySupervised { actor: name });
        }

        let role = actor.role();
        let handle = actor.spawn();
        let control = handle.connect_control()?;
        handle.connect_data()?;

        if let Some(payload) = payload {
            control.send(Message::Start {
                payload,
                reply_to: self.recipient(),
            })?;

            match self.wait_start_reply(&name, init_timeout).await {
                Some(Message::Ok { .. }) => {}
                Some(Message::Error { reason, .. }) => {
                    handle.abort();
                    warn!(reason = %reason, "Actor refused to start");
                    return Err(Error::initialization_failed(name, reason));
                }
                _ => {
                    if handle.is_alive() {
                        handle.abort();
                    } else {
                        debug!("Actor died before answering");
                    }
                    return Err(Error::initialization_failed(name, INIT_NO_REPLY_REASON));
                }
            }
        }

        info!(role = %role, "Actor launched");
        self.supervised.push(Supervised {
            handle: handle.clone(),
            role,
        });
        Ok(handle)
    }

    /// Wait for the start reply of `name`, stashing unrelated messages
    async fn wait_start_reply(&mut self, name: &str, init_timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + init_timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.inbox_rx.recv())
                .await
                .ok()??;
            match &msg {
                Message::Ok { sender } | Message::Error { sender, .. } if sender == name => {
                    return Some(msg)
                }
                Message::ChildExited { name: exited } if exited == name => return None,
                _ => self.pending_events.push(msg),
            }
        }
    }

    /// Send a poison pill to every live supervised actor
    ///
    /// # Errors
    /// Returns `ChannelClosed` if an actor that looks alive refuses the pill.
    pub fn kill_actors(&self, graceful: bool) -> Result<()> {
        for supervised in &self.supervised {
            kill_if_alive(&supervised.handle, graceful)?;
        }
        Ok(())
    }

    /// Wait for every supervised actor to terminate
    pub async fn join(&self, timeout: Option<Duration>) -> Result<()> {
        for supervised in &self.supervised {
            supervised.handle.wait_terminated(timeout).await?;
        }
        Ok(())
    }

    /// Check if every supervised actor is still running
    pub fn are_all_actors_alive(&self) -> bool {
        self.supervised.iter().all(|s| s.handle.is_alive())
    }

    /// Names of the supervised actors, in launch order
    pub fn supervised_names(&self) -> Vec<String> {
        self.supervised
            .iter()
            .map(|s| s.handle.name().to_string())
            .collect()
    }

    /// Check if an actor with this name is supervised
    pub fn is_supervised(&self, name: &str) -> bool {
        self.supervised.iter().any(|s| s.handle.name() == name)
    }

    /// Handles of the supervised actors with the given role
    pub fn handles_with_role(&self, role: ActorRole) -> Vec<ActorHandle> {
        self.supervised
            .iter()
            .filter(|s| s.role == role)
            .map(|s| s.handle.clone())
            .collect()
    }

    /// Take every message supervised actors sent to the supervisor so far
    pub fn drain_events(&mut self) -> Vec<Message> {
        let mut events = std::mem::take(&mut self.pending_events);
        while let Ok(msg) = self.inbox_rx.try_recv() {
            events.push(msg);
        }
        events
    }
}

fn kill_if_alive(handle: &ActorHandle, graceful: bool) -> Result<()> {
    if !handle.is_alive() {
        return Ok(());
    }
    match handle.kill(graceful) {
        // Lost the race with the actor's own exit
        Err(_) if !handle.is_alive() => Ok(()),
        other => other,
    }
}

/// Supervisor aware of pipeline roles
pub struct PipelineSupervisor {
    supervisor: Supervisor,
    config: SupervisorConfig,
}

impl PipelineSupervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        Self {
            supervisor: Supervisor::new(name),
            config,
        }
    }

    /// Whether pullers run until killed instead of until their source ends
    pub fn stream_mode(&self) -> bool {
        self.config.stream_mode
    }

    /// Launch an actor with a generic start handshake
    pub async fn launch<B: Behavior>(&mut self, actor: Actor<B>) -> Result<ActorHandle> {
        let timeout = self.config.init_timeout();
        self.supervisor.launch_actor(actor, true, timeout).await
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Wait for the pipeline to finish
    ///
    /// Outside stream mode, once every puller has terminated the remaining
    /// roles are gracefully stopped in pipeline order, each role fully
    /// terminated before the next is killed. In stream mode this waits for
    /// every actor, which only happens after [`PipelineSupervisor::shutdown`].
    #[instrument(skip(self), fields(stream_mode = self.config.stream_mode), level = "info")]
    pub async fn join(&mut self) -> Result<()> {
        if self.config.stream_mode {
            return self.supervisor.join(None).await;
        }

        let pullers = self.supervisor.handles_with_role(ActorRole::Puller);
        for puller in &pullers {
            puller.wait_terminated(None).await?;
        }
        info!(count = pullers.len(), "All pullers terminated");

        for role in &SHUTDOWN_ORDER[1..] {
            self.stop_role(*role, true).await?;
        }
        Ok(())
    }

    /// Stop every role in pipeline order
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&mut self, graceful: bool) -> Result<()> {
        for role in SHUTDOWN_ORDER {
            self.stop_role(role, graceful).await?;
        }
        Ok(())
    }

    async fn stop_role(&self, role: ActorRole, graceful: bool) -> Result<()> {
        let handles = self.supervisor.handles_with_role(role);
        if handles.is_empty() {
            return Ok(());
        }
        for handle in &handles {
            kill_if_alive(handle, graceful)?;
        }
        let timeout = self.config.join_timeout();
        for handle in &handles {
            handle.wait_terminated(timeout).await?;
        }
        debug!(role = %role, count = handles.len(), "Role stopped");
        Ok(())
    }
}
