//! Report puller
//!
//! TigerStyle: Blocking reads off the async runtime, cooperative stop flag.
//!
//! A puller reads raw records from a database on a blocking thread, decodes
//! them into reports and hands each report to the dispatchers its filter
//! selects. Outside stream mode the puller stops once the database is
//! exhausted; either way it tells its destinations and its parent that no
//! more reports are coming.

use crate::actor::{ActorContext, ActorRole, Behavior};
use crate::filter::ReportFilter;
use crate::handle::ActorHandle;
use crate::message::{Message, StartPayload};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wattflow_core::config::{ActorConfig, PullerConfig};
use wattflow_core::constants::PULLER_STOP_CHECK_INTERVAL_MS;
use wattflow_core::database::ReadableDatabase;
use wattflow_core::error::{Error, Result};
use wattflow_core::report::Report;

/// What the read loop hands back when it stops
struct PollOutcome {
    db: Box<dyn ReadableDatabase>,
    forwarded: u64,
    skipped: u64,
}

/// Puller actor behavior
pub struct PullerBehavior {
    db: Option<Box<dyn ReadableDatabase>>,
    filter: Arc<dyn ReportFilter>,
    config: PullerConfig,
    drain_timeout: Duration,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PullerBehavior {
    pub fn new(
        db: Box<dyn ReadableDatabase>,
        filter: Arc<dyn ReportFilter>,
        config: PullerConfig,
        actor_config: &ActorConfig,
    ) -> Self {
        Self {
            db: Some(db),
            filter,
            config,
            drain_timeout: actor_config.drain_timeout(),
            stop: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Stop the read loop and get the database back
    async fn stop_reading(&mut self) -> Option<PollOutcome> {
        self.stop.store(true, Ordering::SeqCst);
        let mut task = self.task.take()?;
        match tokio::time::timeout(self.drain_timeout, &mut task).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!(error = %e, "Read loop crashed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Read loop did not stop in time"
                );
                None
            }
        }
    }
}

/// Read loop, run on a blocking thread
fn poll_loop(
    mut db: Box<dyn ReadableDatabase>,
    filter: Arc<dyn ReportFilter>,
    config: PullerConfig,
    stop: Arc<AtomicBool>,
    this: ActorHandle,
) -> PollOutcome {
    let kind = db.report_kind();
    let mut forwarded = 0u64;
    let mut skipped = 0u64;

    'poll: loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let records = match db.iter(config.stream_mode) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Database read failed");
                break;
            }
        };
        for record in records {
            if stop.load(Ordering::SeqCst) {
                break 'poll;
            }
            match Report::from_record(kind, &record) {
                Ok(report) => {
                    for destination in filter.route(&report) {
                        if let Err(e) = destination.send_data(Message::Report(report.clone())) {
                            warn!(destination = %destination.name(), error = %e, "Report not delivered");
                        }
                    }
                    forwarded += 1;
                }
                Err(e) if e.is_skippable() => {
                    warn!(error = %e, "Record skipped");
                    skipped += 1;
                }
                Err(e) => {
                    error!(error = %e, "Record decoding failed");
                    break 'poll;
                }
            }
        }

        if !config.stream_mode {
            debug!("Database exhausted");
            break;
        }
        sleep_unless_stopped(config.poll_interval(), &stop);
    }

    if !stop.load(Ordering::SeqCst) && this.send_control(Message::ExitRequest).is_err() {
        debug!("Puller already stopping");
    }
    PollOutcome {
        db,
        forwarded,
        skipped,
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    let step = Duration::from_millis(PULLER_STOP_CHECK_INTERVAL_MS);
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}

#[async_trait]
impl Behavior for PullerBehavior {
    fn role(&self) -> ActorRole {
        ActorRole::Puller
    }

    async fn initialize(&mut self, ctx: &mut ActorContext, _payload: StartPayload) -> Result<()> {
        if self.filter.is_empty() {
            return Err(Error::EmptyReportFilter);
        }
        for destination in self.filter.destinations() {
            destination.connect_data()?;
        }

        let mut db = self
            .db
            .take()
            .ok_or_else(|| Error::internal("puller database already in use"))?;
        if let Err(e) = db.connect() {
            self.db = Some(db);
            return Err(e);
        }

        let filter = self.filter.clone();
        let config = self.config.clone();
        let stop = self.stop.clone();
        let this = ctx.handle().clone();
        self.task = Some(tokio::task::spawn_blocking(move || {
            poll_loop(db, filter, config, stop, this)
        }));

        info!(
            destinations = self.filter.destinations().len(),
            stream_mode = self.config.stream_mode,
            "Puller reading"
        );
        Ok(())
    }

    /// Stop reading, then tell every destination and the parent
    async fn teardown(&mut self, ctx: &mut ActorContext, _graceful: bool) {
        if let Some(mut outcome) = self.stop_reading().await {
            outcome.db.disconnect();
            info!(
                forwarded = outcome.forwarded,
                skipped = outcome.skipped,
                "Puller stopped"
            );
        }

        for destination in self.filter.destinations() {
            let end = Message::End {
                sender: ctx.name().to_string(),
            };
            if let Err(e) = destination.send_data(end) {
                warn!(destination = %destination.name(), error = %e, "End not delivered");
            }
        }
        let end = Message::End {
            sender: ctx.name().to_string(),
        };
        if let Err(e) = ctx.send_parent(end) {
            debug!(error = %e, "Parent gone before end notification");
        }
    }
}
