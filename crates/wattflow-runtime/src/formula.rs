//! Formula actors
//!
//! TigerStyle: One formula per id, failures reported, never fatal.
//!
//! A formula turns the reports of one formula id into power estimations and
//! forwards them to the pushers it was given at start. A formula failing on
//! a report keeps running and tells its dispatcher, which decides whether
//! the formula is stuck in a crash loop.

use crate::actor::{Actor, ActorContext, ActorRole, Behavior, FailurePolicy, Handler, HandlerTable};
use crate::handle::ActorHandle;
use crate::message::{FormulaStart, Message, MessageKind, StartKind, StartPayload};
use crate::route::FormulaId;
use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::{debug, warn};
use wattflow_core::config::ActorConfig;
use wattflow_core::error::{Error, Result};
use wattflow_core::report::Report;

/// Estimation logic of a formula
#[async_trait]
pub trait Formula: Send + 'static {
    /// Prepare the formula with its start values
    async fn initialize(&mut self, _start: &FormulaStart) -> Result<()> {
        Ok(())
    }

    /// Compute output reports from one input report
    async fn compute(&mut self, report: &Report) -> Result<Vec<Report>>;
}

/// Actor behavior running a [`Formula`]
pub struct FormulaBehavior<F: Formula> {
    formula: F,
    start: Option<FormulaStart>,
    computed: u64,
}

impl<F: Formula> FormulaBehavior<F> {
    pub fn new(formula: F) -> Self {
        Self {
            formula,
            start: None,
            computed: 0,
        }
    }

    /// Start values, once initialized
    pub fn start(&self) -> Option<&FormulaStart> {
        self.start.as_ref()
    }

    fn pushers(&self) -> &[ActorHandle] {
        self.start
            .as_ref()
            .map(|s| s.pushers.as_slice())
            .unwrap_or(&[])
    }
}

struct ComputeHandler;

#[async_trait]
impl<F: Formula> Handler<FormulaBehavior<F>> for ComputeHandler {
    async fn handle(
        &self,
        behavior: &mut FormulaBehavior<F>,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        let Message::Report(report) = msg else {
            return Ok(());
        };

        let outputs = behavior.formula.compute(&report).await?;
        behavior.computed += 1;

        for output in outputs {
            for pusher in behavior.pushers() {
                if let Err(e) = pusher.send_data(Message::Report(output.clone())) {
                    warn!(pusher = %pusher.name(), error = %e, "Output lost");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<F: Formula> Behavior for FormulaBehavior<F> {
    fn role(&self) -> ActorRole {
        ActorRole::Formula
    }

    fn start_kind(&self) -> StartKind {
        StartKind::Formula
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::NotifyParent
    }

    fn register_handlers(&self, table: &mut HandlerTable<Self>) {
        table.add_handler(MessageKind::Report, ComputeHandler, true);
    }

    async fn initialize(&mut self, _ctx: &mut ActorContext, payload: StartPayload) -> Result<()> {
        let StartPayload::Formula(start) = payload else {
            return Err(Error::internal("formula started without formula values"));
        };
        self.formula.initialize(&start).await?;
        debug!(formula_id = %start.formula_id, pushers = start.pushers.len(), "Formula ready");
        self.start = Some(start);
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &mut ActorContext, _graceful: bool) {
        debug!(computed = self.computed, "Formula stopping");
    }
}

/// Formula emitting a constant power estimation per input report
#[derive(Debug, Clone)]
pub struct DummyFormula {
    power: f64,
}

impl DummyFormula {
    pub const DEFAULT_POWER: f64 = 42.0;

    pub fn new() -> Self {
        Self::with_power(Self::DEFAULT_POWER)
    }

    pub fn with_power(power: f64) -> Self {
        Self { power }
    }
}

impl Default for DummyFormula {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Formula for DummyFormula {
    async fn compute(&mut self, report: &Report) -> Result<Vec<Report>> {
        Ok(vec![Report::power(
            report.timestamp,
            &report.sensor,
            &report.target,
            self.power,
        )])
    }
}

// =============================================================================
// FormulaFactory
// =============================================================================

/// Creates and spawns formula actors for a dispatcher
///
/// The returned actor is running but not started; the dispatcher sends it
/// the start handshake.
pub trait FormulaFactory: Send + Sync + 'static {
    fn create(&self, formula_name: &str, formula_id: &FormulaId) -> Result<ActorHandle>;
}

/// Factory building formulas from a closure
pub struct FnFormulaFactory<F, Mk> {
    make: Mk,
    actor_config: ActorConfig,
    _formula: PhantomData<fn() -> F>,
}

impl<F, Mk> FnFormulaFactory<F, Mk>
where
    F: Formula,
    Mk: Fn(&FormulaId) -> F + Send + Sync + 'static,
{
    pub fn new(make: Mk, actor_config: ActorConfig) -> Self {
        Self {
            make,
            actor_config,
            _formula: PhantomData,
        }
    }
}

impl<F, Mk> FormulaFactory for FnFormulaFactory<F, Mk>
where
    F: Formula,
    Mk: Fn(&FormulaId) -> F + Send + Sync + 'static,
{
    fn create(&self, formula_name: &str, formula_id: &FormulaId) -> Result<ActorHandle> {
        let behavior = FormulaBehavior::new((self.make)(formula_id));
        let actor = Actor::new(formula_name, behavior, self.actor_config.clone())?;
        Ok(actor.spawn())
    }
}
