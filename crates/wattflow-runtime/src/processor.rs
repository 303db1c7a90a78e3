//! Report processors
//!
//! TigerStyle: Per-report transformation, transparent end-of-stream.
//!
//! A processor sits between pullers and dispatchers. It runs every report
//! through a [`ReportModifier`], which may rewrite or drop it, and forwards
//! what is left to its targets. End messages are passed on unchanged, so a
//! dispatcher still sees one End per producer.

use crate::actor::{ActorContext, ActorRole, Behavior, Handler, HandlerTable};
use crate::handle::ActorHandle;
use crate::message::{Message, MessageKind, StartPayload};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use wattflow_core::error::{Error, Result};
use wattflow_core::report::Report;

/// Rewrites reports on their way to the dispatchers
#[async_trait]
pub trait ReportModifier: Send + 'static {
    /// Modify a report; `None` drops it
    async fn modify(&mut self, report: Report) -> Result<Option<Report>>;
}

#[async_trait]
impl<F> ReportModifier for F
where
    F: FnMut(Report) -> Option<Report> + Send + 'static,
{
    async fn modify(&mut self, report: Report) -> Result<Option<Report>> {
        Ok((self)(report))
    }
}

/// Processor actor behavior
pub struct ProcessorBehavior {
    modifier: Box<dyn ReportModifier>,
    targets: Vec<ActorHandle>,
    forwarded: u64,
    dropped: u64,
}

impl ProcessorBehavior {
    /// Create a processor; targets registered twice receive reports once
    pub fn new(modifier: impl ReportModifier, targets: Vec<ActorHandle>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|t| seen.insert(t.name().to_string()))
            .collect();
        Self {
            modifier: Box::new(modifier),
            targets,
            forwarded: 0,
            dropped: 0,
        }
    }

    pub fn targets(&self) -> &[ActorHandle] {
        &self.targets
    }

    fn send_all(&self, msg: &Message) {
        for target in &self.targets {
            if let Err(e) = target.send_data(msg.clone()) {
                warn!(target = %target.name(), error = %e, "Message not delivered");
            }
        }
    }

    async fn process(&mut self, report: Report) {
        match self.modifier.modify(report).await {
            Ok(Some(report)) => {
                self.send_all(&Message::Report(report));
                self.forwarded += 1;
            }
            Ok(None) => self.dropped += 1,
            Err(e) => {
                warn!(error = %e, "Report modification failed, report dropped");
                self.dropped += 1;
            }
        }
    }
}

struct ReportHandler;

#[async_trait]
impl Handler<ProcessorBehavior> for ReportHandler {
    async fn handle(
        &self,
        processor: &mut ProcessorBehavior,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::Report(report) = msg {
            processor.process(report).await;
        }
        Ok(())
    }
}

struct EndHandler;

#[async_trait]
impl Handler<ProcessorBehavior> for EndHandler {
    async fn handle(
        &self,
        processor: &mut ProcessorBehavior,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::End { sender } = &msg {
            debug!(sender = %sender, "End passed on");
        }
        processor.send_all(&msg);
        Ok(())
    }
}

#[async_trait]
impl Behavior for ProcessorBehavior {
    fn role(&self) -> ActorRole {
        ActorRole::Processor
    }

    fn register_handlers(&self, table: &mut HandlerTable<Self>) {
        table.add_handler(MessageKind::Report, ReportHandler, true);
        table.add_handler(MessageKind::End, EndHandler, false);
    }

    async fn initialize(&mut self, _ctx: &mut ActorContext, _payload: StartPayload) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::invalid_configuration(
                "processor.targets",
                "no target actor",
            ));
        }
        for target in &self.targets {
            target.connect_data()?;
        }
        info!(targets = self.targets.len(), "Processor ready");
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &mut ActorContext, _graceful: bool) {
        info!(
            forwarded = self.forwarded,
            dropped = self.dropped,
            "Processor stopping"
        );
    }
}
