//! Pipeline coordinator
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.
//!
//! Actors are launched consumers first: pushers, then dispatchers (which
//! hand their pushers to every formula they create), then processors, then
//! pullers.

use crate::actor::{Actor, Behavior};
use crate::dispatcher::DispatcherBehavior;
use crate::filter::ReportFilter;
use crate::formula::FormulaFactory;
use crate::handle::ActorHandle;
use crate::message::Message;
use crate::processor::{ProcessorBehavior, ReportModifier};
use crate::puller::PullerBehavior;
use crate::pusher::PusherBehavior;
use crate::route::RouteTable;
use crate::supervisor::PipelineSupervisor;
use std::sync::Arc;
use tracing::{info, warn};
use wattflow_core::config::WattflowConfig;
use wattflow_core::database::{ReadableDatabase, WritableDatabase};
use wattflow_core::error::Result;

/// A running power pipeline
pub struct Pipeline {
    config: WattflowConfig,
    supervisor: PipelineSupervisor,
    pushers: Vec<ActorHandle>,
    dispatchers: Vec<ActorHandle>,
}

impl Pipeline {
    /// Create an empty pipeline
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the configuration does not validate.
    pub fn new(config: WattflowConfig) -> Result<Self> {
        config.validate()?;
        let supervisor = PipelineSupervisor::new("pipeline", config.supervisor.clone());
        Ok(Self {
            config,
            supervisor,
            pushers: Vec::new(),
            dispatchers: Vec::new(),
        })
    }

    pub fn config(&self) -> &WattflowConfig {
        &self.config
    }

    /// Launch a pusher writing to `db`
    pub async fn add_pusher(
        &mut self,
        name: &str,
        db: impl WritableDatabase,
    ) -> Result<ActorHandle> {
        let behavior = PusherBehavior::new(Box::new(db), self.config.pusher.clone());
        let handle = self.add_actor(name, behavior).await?;
        self.pushers.push(handle.clone());
        Ok(handle)
    }

    /// Launch a dispatcher feeding the pushers launched so far
    pub async fn add_dispatcher(
        &mut self,
        name: &str,
        route_table: RouteTable,
        factory: Arc<dyn FormulaFactory>,
    ) -> Result<ActorHandle> {
        if self.pushers.is_empty() {
            warn!(dispatcher = %name, "Dispatcher launched without pushers");
        }
        let behavior = DispatcherBehavior::new(
            self.config.dispatcher.clone(),
            route_table,
            factory,
            self.pushers.clone(),
            &self.config.actor,
        );
        let handle = self.add_actor(name, behavior).await?;
        self.dispatchers.push(handle.clone());
        Ok(handle)
    }

    /// Launch a processor rewriting reports on their way to `targets`
    pub async fn add_processor(
        &mut self,
        name: &str,
        modifier: impl ReportModifier,
        targets: Vec<ActorHandle>,
    ) -> Result<ActorHandle> {
        let behavior = ProcessorBehavior::new(modifier, targets);
        self.add_actor(name, behavior).await
    }

    /// Launch a puller reading `db` and routing through `filter`
    pub async fn add_puller(
        &mut self,
        name: &str,
        db: impl ReadableDatabase,
        filter: impl ReportFilter + 'static,
    ) -> Result<ActorHandle> {
        let behavior = PullerBehavior::new(
            Box::new(db),
            Arc::new(filter),
            self.config.puller.clone(),
            &self.config.actor,
        );
        self.add_actor(name, behavior).await
    }

    /// Launch any actor under the pipeline supervisor
    pub async fn add_actor<B: Behavior>(&mut self, name: &str, behavior: B) -> Result<ActorHandle> {
        let actor = Actor::new(name, behavior, self.config.actor.clone())?;
        self.supervisor.launch(actor).await
    }

    pub fn pushers(&self) -> &[ActorHandle] {
        &self.pushers
    }

    pub fn dispatchers(&self) -> &[ActorHandle] {
        &self.dispatchers
    }

    /// Take the End and exit notifications pipeline actors sent so far
    pub fn drain_events(&mut self) -> Vec<Message> {
        self.supervisor.supervisor_mut().drain_events()
    }

    /// Wait for the pipeline to run to completion
    pub async fn join(&mut self) -> Result<()> {
        self.supervisor.join().await?;
        info!("Pipeline finished");
        Ok(())
    }

    /// Stop every actor in pipeline order
    pub async fn shutdown(&mut self, graceful: bool) -> Result<()> {
        info!(graceful, "Stopping pipeline");
        self.supervisor.shutdown(graceful).await
    }

    /// Run until completion or until the process receives Ctrl-C
    pub async fn run_until_signal(&mut self) -> Result<()> {
        tokio::select! {
            result = self.supervisor.join() => result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Signal listener failed");
                }
                info!("Interrupted");
                self.supervisor.shutdown(true).await
            }
        }
    }
}
