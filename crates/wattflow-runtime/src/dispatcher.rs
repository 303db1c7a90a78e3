//! Report dispatcher
//!
//! TigerStyle: Lazy formula creation, bounded pool, explicit end-of-stream.
//!
//! The dispatcher derives formula ids from each report through the route
//! table and forwards the report to the formulas owning those ids:
//!
//! - A full-length id addresses exactly one formula. A formula is created
//!   the first time its id is seen, and reports for it are queued until it
//!   answers the start handshake.
//! - A shorter id addresses every running formula whose id starts with it,
//!   looked up in a prefix tree keyed by id components.
//!
//! Every report sent to a formula is tagged with a sequence id. Poison
//! notifications coming back feed a per-formula [`BlockingDetector`], and a
//! formula found in a crash loop is replaced by a fresh one that takes over
//! its id and its place in the prefix tree.
//!
//! With a positive `upstream_count`, End messages from that many distinct
//! producers put the dispatcher in exit-drain mode. With 0, End messages are
//! only recorded and the supervisor stops the dispatcher once its pullers
//! are done.

use crate::actor::{ActorContext, ActorRole, Behavior, Handler, HandlerTable};
use crate::blocking::BlockingDetector;
use crate::formula::FormulaFactory;
use crate::handle::ActorHandle;
use crate::message::{FormulaStart, Message, MessageKind, StartPayload};
use crate::route::{FormulaId, RouteTable};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wattflow_core::config::{ActorConfig, DispatcherConfig};
use wattflow_core::constants::FORMULA_TREE_ROOT_LABEL;
use wattflow_core::error::{Error, Result};
use wattflow_core::report::Report;
use wattflow_core::tree::PrefixTree;

/// Formula that answered its start handshake
struct ActiveFormula {
    id: FormulaId,
    handle: ActorHandle,
    detector: BlockingDetector,
}

/// Formula created but not yet started
struct PendingFormula {
    id: FormulaId,
    handle: ActorHandle,
    queue: VecDeque<Report>,
    /// Replacements inherit the tree leaf of the formula they replace
    in_tree: bool,
}

/// Dispatcher actor behavior
pub struct DispatcherBehavior {
    config: DispatcherConfig,
    route_table: RouteTable,
    factory: Arc<dyn FormulaFactory>,
    pushers: Vec<ActorHandle>,
    drain_timeout: Duration,

    pool: HashMap<String, ActiveFormula>,
    waiting: HashMap<String, PendingFormula>,
    id_index: HashMap<FormulaId, String>,
    tree: PrefixTree<String, String>,

    formulas_created: u64,
    ended: HashSet<String>,
    exiting: bool,
    ends_forwarded: bool,
}

impl DispatcherBehavior {
    pub fn new(
        config: DispatcherConfig,
        route_table: RouteTable,
        factory: Arc<dyn FormulaFactory>,
        pushers: Vec<ActorHandle>,
        actor_config: &ActorConfig,
    ) -> Self {
        Self {
            config,
            route_table,
            factory,
            pushers,
            drain_timeout: actor_config.drain_timeout(),
            pool: HashMap::new(),
            waiting: HashMap::new(),
            id_index: HashMap::new(),
            tree: PrefixTree::with_root(FORMULA_TREE_ROOT_LABEL.to_string()),
            formulas_created: 0,
            ended: HashSet::new(),
            exiting: false,
            ends_forwarded: false,
        }
    }

    fn formulas_count(&self) -> usize {
        self.pool.len() + self.waiting.len()
    }

    fn route_report(&mut self, ctx: &ActorContext, report: Report) -> Result<()> {
        let Some(rule) = self.route_table.get_dispatch_rule(report.kind).cloned() else {
            warn!(kind = %report.kind, "No dispatch rule, report dropped");
            return Ok(());
        };

        let ids = self
            .route_table
            .reconcile(rule.as_ref(), rule.formula_ids(&report));
        let full_len = self.route_table.primary_field_count();

        for id in ids {
            if id.len() == full_len {
                self.send_to_formula(ctx, id, report.clone())?;
            } else {
                self.send_to_prefix(&id, &report);
            }
        }
        Ok(())
    }

    fn send_to_formula(&mut self, ctx: &ActorContext, id: FormulaId, report: Report) -> Result<()> {
        if let Some(name) = self.id_index.get(&id) {
            if let Some(active) = self.pool.get_mut(name) {
                send_tagged(active, report);
                return Ok(());
            }
            if let Some(pending) = self.waiting.get_mut(name) {
                pending.queue.push_back(report);
                return Ok(());
            }
        }

        if self.exiting {
            debug!(formula_id = %id, "Report for new formula after end of stream dropped");
            return Ok(());
        }
        if self.formulas_count() >= self.config.max_formulas {
            warn!(
                formula_id = %id,
                max = self.config.max_formulas,
                "Formula limit reached, report dropped"
            );
            return Ok(());
        }

        self.spawn_formula(ctx, id, VecDeque::from([report]))?;
        Ok(())
    }

    fn send_to_prefix(&mut self, prefix: &FormulaId, report: &Report) {
        let names = self.tree.get(&tree_path(prefix));
        if names.is_empty() {
            debug!(prefix = %prefix, "No formula under prefix");
        }
        for name in names {
            if let Some(active) = self.pool.get_mut(&name) {
                send_tagged(active, report.clone());
            } else if let Some(pending) = self.waiting.get_mut(&name) {
                pending.queue.push_back(report.clone());
            }
        }
    }

    fn spawn_formula(
        &mut self,
        ctx: &ActorContext,
        id: FormulaId,
        queue: VecDeque<Report>,
    ) -> Result<String> {
        let name = format!("{}-formula-{}", ctx.name(), self.formulas_created);
        self.formulas_created += 1;

        let handle = self.factory.create(&name, &id)?;
        handle.send_control(Message::Start {
            payload: StartPayload::Formula(FormulaStart {
                device_id: self.config.device_id.clone(),
                formula_id: id.clone(),
                formula_name: name.clone(),
                pushers: self.pushers.clone(),
            }),
            reply_to: ctx.self_recipient(),
        })?;

        info!(formula = %name, formula_id = %id, "Formula created");
        self.id_index.insert(id.clone(), name.clone());
        self.waiting.insert(
            name.clone(),
            PendingFormula {
                id,
                handle,
                queue,
                in_tree: false,
            },
        );
        Ok(name)
    }

    fn formula_started(&mut self, name: String) -> Result<()> {
        let Some(pending) = self.waiting.remove(&name) else {
            debug!(formula = %name, "Start reply from unknown formula");
            return Ok(());
        };

        if !pending.in_tree {
            self.tree.add(&tree_path(&pending.id), name.clone())?;
        }
        let mut active = ActiveFormula {
            id: pending.id,
            handle: pending.handle,
            detector: BlockingDetector::new(),
        };
        debug!(formula = %name, queued = pending.queue.len(), "Formula started");
        for report in pending.queue {
            send_tagged(&mut active, report);
        }
        if self.exiting && active.handle.kill(true).is_err() {
            debug!(formula = %name, "Formula gone before end of stream");
        }
        self.pool.insert(name, active);
        Ok(())
    }

    fn formula_refused(&mut self, name: &str, reason: &str) {
        if let Some(pending) = self.waiting.remove(name) {
            warn!(
                formula = %name,
                reason = %reason,
                dropped = pending.queue.len(),
                "Formula failed to start"
            );
            self.untrack(&pending.id, name);
        }
    }

    fn poison_received(&mut self, ctx: &ActorContext, name: &str, seq: u32) -> Result<()> {
        let Some(active) = self.pool.get_mut(name) else {
            return Ok(());
        };
        active.detector.notify_poison_received(seq);
        if !active.detector.is_blocked() {
            return Ok(());
        }

        let Some(active) = self.pool.remove(name) else {
            return Ok(());
        };
        warn!(formula = %name, formula_id = %active.id, "Formula blocked, restarting");
        if active.handle.send_control(Message::ExitRequest).is_err() {
            debug!(formula = %name, "Blocked formula already gone");
        }

        let path = tree_path(&active.id);
        self.tree.remove(&path, &name.to_string());
        let replacement = match self.spawn_formula(ctx, active.id.clone(), VecDeque::new()) {
            Ok(replacement) => replacement,
            Err(e) => {
                self.forget_id(&active.id, name);
                return Err(e);
            }
        };
        self.tree.add(&path, replacement.clone())?;
        if let Some(pending) = self.waiting.get_mut(&replacement) {
            pending.in_tree = true;
        }
        Ok(())
    }

    fn formula_exited(&mut self, ctx: &ActorContext, name: &str) {
        if let Some(active) = self.pool.remove(name) {
            self.untrack(&active.id, name);
            debug!(formula = %name, "Formula exited");
        } else if let Some(pending) = self.waiting.remove(name) {
            warn!(
                formula = %name,
                dropped = pending.queue.len(),
                "Formula exited before starting"
            );
            self.untrack(&pending.id, name);
        }

        if self.exiting && self.formulas_count() == 0 {
            self.finish(ctx);
        }
    }

    fn end_received(&mut self, ctx: &ActorContext, sender: &str) {
        if !self.ended.insert(sender.to_string()) {
            debug!(sender = %sender, "Duplicate End ignored");
            return;
        }
        let expected = self.config.upstream_count;
        debug!(
            sender = %sender,
            received = self.ended.len(),
            expected,
            "End received"
        );
        if self.exiting || expected == 0 || self.ended.len() < expected {
            return;
        }

        self.exiting = true;
        info!(formulas = self.formulas_count(), "All upstream producers ended");
        if self.formulas_count() == 0 {
            self.finish(ctx);
            return;
        }
        for (name, active) in &self.pool {
            if active.handle.kill(true).is_err() {
                debug!(formula = %name, "Formula already gone");
            }
        }
    }

    /// Hand queued reports to formulas whose start reply is still in flight
    async fn release_pending(&mut self) {
        let names: Vec<String> = self.waiting.keys().cloned().collect();
        for name in names {
            let started = match self.waiting.get(&name) {
                Some(pending) => pending.handle.wait_started(self.drain_timeout).await,
                None => continue,
            };
            if !started {
                continue;
            }
            if let Err(e) = self.formula_started(name) {
                warn!(error = %e, "Queued reports not released");
            }
        }
    }

    /// Drop the tree leaf of `name` and its index entry
    fn untrack(&mut self, id: &FormulaId, name: &str) {
        self.tree.remove(&tree_path(id), &name.to_string());
        self.forget_id(id, name);
    }

    /// Only clear the index entry if it still points at `name`
    fn forget_id(&mut self, id: &FormulaId, name: &str) {
        if self.id_index.get(id).map(String::as_str) == Some(name) {
            self.id_index.remove(id);
        }
    }

    fn finish(&mut self, ctx: &ActorContext) {
        self.forward_end(ctx);
        ctx.request_exit();
    }

    fn forward_end(&mut self, ctx: &ActorContext) {
        if self.ends_forwarded {
            return;
        }
        self.ends_forwarded = true;
        let mut seen = HashSet::new();
        for pusher in &self.pushers {
            if !seen.insert(pusher.name().to_string()) {
                continue;
            }
            let end = Message::End {
                sender: ctx.name().to_string(),
            };
            if let Err(e) = pusher.send_data(end) {
                warn!(pusher = %pusher.name(), error = %e, "End not delivered");
            }
        }
    }
}

fn tree_path(id: &FormulaId) -> Vec<String> {
    std::iter::once(FORMULA_TREE_ROOT_LABEL.to_string())
        .chain(id.components().iter().cloned())
        .collect()
}

fn send_tagged(formula: &mut ActiveFormula, mut report: Report) {
    report.dispatch_seq = Some(formula.detector.next_seq_id());
    if let Err(e) = formula.handle.send_data(Message::Report(report)) {
        debug!(formula = %formula.handle.name(), error = %e, "Report not delivered");
    }
}

// =============================================================================
// Handlers
// =============================================================================

struct ReportHandler;

#[async_trait]
impl Handler<DispatcherBehavior> for ReportHandler {
    async fn handle(
        &self,
        dispatcher: &mut DispatcherBehavior,
        ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        match msg {
            Message::Report(report) => dispatcher.route_report(ctx, report),
            _ => Ok(()),
        }
    }
}

struct StartReplyHandler;

#[async_trait]
impl Handler<DispatcherBehavior> for StartReplyHandler {
    async fn handle(
        &self,
        dispatcher: &mut DispatcherBehavior,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        match msg {
            Message::Ok { sender } => dispatcher.formula_started(sender),
            Message::Error { sender, reason } => {
                dispatcher.formula_refused(&sender, &reason);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct PoisonHandler;

#[async_trait]
impl Handler<DispatcherBehavior> for PoisonHandler {
    async fn handle(
        &self,
        dispatcher: &mut DispatcherBehavior,
        ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        match msg {
            Message::PoisonNotification {
                sender,
                seq,
                detail,
            } => {
                debug!(formula = %sender, seq, detail = %detail, "Poison notification");
                dispatcher.poison_received(ctx, &sender, seq)
            }
            _ => Ok(()),
        }
    }
}

struct ChildExitedHandler;

#[async_trait]
impl Handler<DispatcherBehavior> for ChildExitedHandler {
    async fn handle(
        &self,
        dispatcher: &mut DispatcherBehavior,
        ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::ChildExited { name } = msg {
            dispatcher.formula_exited(ctx, &name);
        }
        Ok(())
    }
}

struct EndHandler;

#[async_trait]
impl Handler<DispatcherBehavior> for EndHandler {
    async fn handle(
        &self,
        dispatcher: &mut DispatcherBehavior,
        ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::End { sender } = msg {
            dispatcher.end_received(ctx, &sender);
        }
        Ok(())
    }
}

#[async_trait]
impl Behavior for DispatcherBehavior {
    fn role(&self) -> ActorRole {
        ActorRole::Dispatcher
    }

    fn register_handlers(&self, table: &mut HandlerTable<Self>) {
        table.add_handler(MessageKind::Report, ReportHandler, true);
        table.add_handler(MessageKind::Ok, StartReplyHandler, false);
        table.add_handler(MessageKind::Error, StartReplyHandler, false);
        table.add_handler(MessageKind::PoisonNotification, PoisonHandler, false);
        table.add_handler(MessageKind::ChildExited, ChildExitedHandler, false);
        table.add_handler(MessageKind::End, EndHandler, false);
    }

    async fn initialize(&mut self, _ctx: &mut ActorContext, _payload: StartPayload) -> Result<()> {
        if self.route_table.primary().is_none() {
            return Err(Error::NoPrimaryRule);
        }
        info!(
            rules = self.route_table.len(),
            pushers = self.pushers.len(),
            "Dispatcher ready"
        );
        Ok(())
    }

    /// Stop every formula, waiting at most the drain timeout for each
    async fn teardown(&mut self, ctx: &mut ActorContext, graceful: bool) {
        if graceful {
            self.release_pending().await;
        }

        let handles: Vec<ActorHandle> = self
            .pool
            .values()
            .map(|f| f.handle.clone())
            .chain(self.waiting.values().map(|f| f.handle.clone()))
            .collect();

        for handle in &handles {
            if handle.kill(graceful).is_err() {
                debug!(formula = %handle.name(), "Formula already gone");
            }
        }
        for handle in &handles {
            if let Err(e) = handle.wait_terminated(Some(self.drain_timeout)).await {
                warn!(error = %e, "Formula did not stop, aborting");
                handle.abort();
            }
        }

        info!(
            formulas = handles.len(),
            created = self.formulas_created,
            producers_ended = self.ended.len(),
            "Dispatcher stopping"
        );
        self.pool.clear();
        self.waiting.clear();
        self.id_index.clear();
        self.forward_end(ctx);
    }
}
