//! Integration tests for complete pipelines
//!
//! TigerStyle: End-to-end runs over in-memory databases, ordered shutdown.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wattflow_core::config::{ActorConfig, PullerConfig, WattflowConfig};
use wattflow_core::database::{MemorySink, MemorySource};
use wattflow_core::error::{Error, Result};
use wattflow_core::report::{Report, ReportKind};
use wattflow_core::telemetry::{init_telemetry, TelemetryConfig};
use wattflow_runtime::{
    Actor, ActorContext, ActorHandle, ActorRole, Behavior, DummyFormula, FnFormulaFactory,
    FormulaFactory, FormulaId, Handler, HandlerTable, HwpcDepthLevel, HwpcDispatchRule, Message,
    MessageKind, Pipeline, PullerBehavior, RouteTable, RulesetReportFilter, Supervisor,
};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Install logging once per test binary; later calls are no-ops
fn init_logs() {
    let config = TelemetryConfig::from_env().with_log_level("warn");
    if let Ok(guard) = init_telemetry(config) {
        std::mem::forget(guard);
    }
}

fn hwpc_record(ms: i64) -> Value {
    json!({
        "timestamp": ms,
        "sensor": "s1",
        "target": "all",
        "groups": {
            "rapl": {"0": {"0": {"RAPL_ENERGY_PKG": 100}}},
            "core": {"0": {"0": {"INSTRUCTIONS": 10}, "1": {"INSTRUCTIONS": 12}}}
        }
    })
}

fn batch_config() -> WattflowConfig {
    let mut config = WattflowConfig::default();
    config.pusher.flush_interval_ms = 60_000;
    config.pusher.max_buffer_size = 1000;
    config
}

fn dummy_factory() -> Arc<dyn FormulaFactory> {
    Arc::new(FnFormulaFactory::new(
        |_: &FormulaId| DummyFormula::new(),
        ActorConfig::default(),
    ))
}

fn exit_order(events: Vec<Message>) -> Vec<String> {
    events
        .into_iter()
        .filter_map(|m| match m {
            Message::ChildExited { name } => Some(name),
            _ => None,
        })
        .collect()
}

fn route_table() -> RouteTable {
    let mut table = RouteTable::new();
    table
        .add_rule(
            ReportKind::Hwpc,
            HwpcDispatchRule::new(HwpcDepthLevel::Core, true),
        )
        .unwrap();
    table
}

// =============================================================================
// Counting Destination
// =============================================================================

/// Stand-in dispatcher counting what a puller sends it
#[derive(Clone, Default)]
struct Counts {
    reports: Arc<AtomicUsize>,
    ends: Arc<AtomicUsize>,
}

struct CountingDestination {
    counts: Counts,
}

struct CountHandler;

#[async_trait]
impl Handler<CountingDestination> for CountHandler {
    async fn handle(
        &self,
        dest: &mut CountingDestination,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        match msg {
            Message::Report(_) => dest.counts.reports.fetch_add(1, Ordering::SeqCst),
            Message::End { .. } => dest.counts.ends.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
        Ok(())
    }
}

impl Behavior for CountingDestination {
    fn role(&self) -> ActorRole {
        ActorRole::Dispatcher
    }

    fn register_handlers(&self, table: &mut HandlerTable<Self>) {
        table.add_handler(MessageKind::Report, CountHandler, true);
        table.add_handler(MessageKind::End, CountHandler, false);
    }
}

async fn counting_destination(supervisor: &mut Supervisor, name: &str) -> (ActorHandle, Counts) {
    let counts = Counts::default();
    let actor = Actor::new(
        name,
        CountingDestination {
            counts: counts.clone(),
        },
        ActorConfig::default(),
    )
    .unwrap();
    let handle = supervisor.launch_actor(actor, true, TIMEOUT).await.unwrap();
    (handle, counts)
}

// =============================================================================
// Puller
// =============================================================================

#[tokio::test]
async fn test_puller_forwards_everything_then_ends_once() {
    let mut supervisor = Supervisor::new("test");
    let (d1, c1) = counting_destination(&mut supervisor, "d1").await;
    let (d2, c2) = counting_destination(&mut supervisor, "d2").await;

    let mut records: Vec<Value> = (0..10).map(hwpc_record).collect();
    records.insert(4, json!({"timestamp": 1, "target": "all", "groups": {}}));
    let source = MemorySource::new(ReportKind::Hwpc, records);

    // d1 is registered twice; it gets each report twice but one End
    let filter = RulesetReportFilter::new()
        .with_rule(|_| true, d1.clone())
        .with_rule(|r| r.sensor == "s1", d1)
        .with_rule(|_| true, d2);
    let puller = PullerBehavior::new(
        Box::new(source.clone()),
        Arc::new(filter),
        PullerConfig::default(),
        &ActorConfig::default(),
    );
    let puller = supervisor
        .launch_actor(
            Actor::new("puller", puller, ActorConfig::default()).unwrap(),
            true,
            TIMEOUT,
        )
        .await
        .unwrap();

    puller.wait_terminated(Some(TIMEOUT)).await.unwrap();
    assert_eq!(source.remaining(), 0);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while c2.ends.load(Ordering::SeqCst) == 0 || c1.ends.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "End not delivered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(c1.reports.load(Ordering::SeqCst), 20);
    assert_eq!(c2.reports.load(Ordering::SeqCst), 10);
    assert_eq!(c1.ends.load(Ordering::SeqCst), 1);
    assert_eq!(c2.ends.load(Ordering::SeqCst), 1);

    let parent_ends = supervisor
        .drain_events()
        .into_iter()
        .filter(|m| matches!(m, Message::End { sender } if sender == "puller"))
        .count();
    assert_eq!(parent_ends, 1);
}

#[tokio::test]
async fn test_puller_with_empty_filter_refuses_start() {
    let mut supervisor = Supervisor::new("test");
    let puller = PullerBehavior::new(
        Box::new(MemorySource::new(ReportKind::Hwpc, Vec::new())),
        Arc::new(RulesetReportFilter::new()),
        PullerConfig::default(),
        &ActorConfig::default(),
    );
    let err = supervisor
        .launch_actor(
            Actor::new("puller", puller, ActorConfig::default()).unwrap(),
            true,
            TIMEOUT,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InitializationFailed { .. }));
}

#[tokio::test]
async fn test_stream_mode_puller_keeps_polling_until_killed() {
    let mut supervisor = Supervisor::new("test");
    let (dest, counts) = counting_destination(&mut supervisor, "dispatcher").await;

    let source = MemorySource::new(ReportKind::Hwpc, vec![hwpc_record(0)]);
    let config = PullerConfig {
        stream_mode: true,
        poll_interval_ms: 10,
    };
    let puller = PullerBehavior::new(
        Box::new(source.clone()),
        Arc::new(RulesetReportFilter::new().with_rule(|_| true, dest)),
        config,
        &ActorConfig::default(),
    );
    let puller = supervisor
        .launch_actor(
            Actor::new("puller", puller, ActorConfig::default()).unwrap(),
            true,
            TIMEOUT,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    source.push(hwpc_record(1)).unwrap();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while counts.reports.load(Ordering::SeqCst) < 2 {
        assert!(tokio::time::Instant::now() < deadline, "late record not read");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(puller.is_alive());

    puller.kill(true).unwrap();
    puller.wait_terminated(Some(TIMEOUT)).await.unwrap();
}

// =============================================================================
// Full Pipeline
// =============================================================================

#[tokio::test]
async fn test_pipeline_runs_to_completion() {
    init_logs();
    let mut pipeline = Pipeline::new(batch_config()).unwrap();

    let sink = MemorySink::new();
    let pusher = pipeline.add_pusher("pusher", sink.clone()).await.unwrap();
    let dispatcher = pipeline
        .add_dispatcher("dispatcher", route_table(), dummy_factory())
        .await
        .unwrap();

    let records: Vec<Value> = (0..10).map(hwpc_record).collect();
    let filter = RulesetReportFilter::new()
        .with_rule(|r| r.kind == ReportKind::Hwpc, dispatcher.clone());
    pipeline
        .add_puller("puller", MemorySource::new(ReportKind::Hwpc, records), filter)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), pipeline.join())
        .await
        .expect("pipeline did not finish")
        .unwrap();

    assert!(!dispatcher.is_alive());
    assert!(!pusher.is_alive());

    // One output per core and per input report, written in one sorted batch
    let saved = sink.reports().await;
    assert_eq!(saved.len(), 20);
    assert_eq!(sink.batches().await, vec![20]);
    assert!(saved.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_pipeline_refuses_pusher_that_cannot_connect() {
    let mut pipeline = Pipeline::new(WattflowConfig::default()).unwrap();
    let err = pipeline
        .add_pusher("pusher", MemorySink::new().with_connect_failure())
        .await
        .unwrap_err();
    match err {
        Error::InitializationFailed { actor, reason } => {
            assert_eq!(actor, "pusher");
            assert!(reason.contains("refuse connections"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(pipeline.pushers().is_empty());
}

#[tokio::test]
async fn test_stream_pipeline_shutdown_flushes() {
    init_logs();
    let mut config = batch_config().with_stream_mode(true);
    config.puller.poll_interval_ms = 10;
    let mut pipeline = Pipeline::new(config).unwrap();

    let sink = MemorySink::new();
    pipeline.add_pusher("pusher", sink.clone()).await.unwrap();
    let dispatcher = pipeline
        .add_dispatcher("dispatcher", route_table(), dummy_factory())
        .await
        .unwrap();
    let source = MemorySource::new(ReportKind::Hwpc, vec![hwpc_record(0), hwpc_record(1)]);
    pipeline
        .add_puller(
            "puller",
            source.clone(),
            RulesetReportFilter::new().with_rule(|_| true, dispatcher),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while source.remaining() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "records not read");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    pipeline.shutdown(true).await.unwrap();
    assert_eq!(sink.reports().await.len(), 4);
}

#[tokio::test]
async fn test_generic_actor_in_pipeline() {
    struct Idle;
    impl Behavior for Idle {}

    let mut pipeline = Pipeline::new(WattflowConfig::default()).unwrap();
    let handle = pipeline.add_actor("idle", Idle).await.unwrap();
    assert!(handle.is_alive());
    pipeline.shutdown(true).await.unwrap();
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn test_dispatcher_outlives_first_of_two_pullers() {
    init_logs();
    let mut pipeline = Pipeline::new(batch_config()).unwrap();
    let sink = MemorySink::new();
    pipeline.add_pusher("pusher", sink.clone()).await.unwrap();
    let dispatcher = pipeline
        .add_dispatcher("dispatcher", route_table(), dummy_factory())
        .await
        .unwrap();

    let first = pipeline
        .add_puller(
            "puller-a",
            MemorySource::new(ReportKind::Hwpc, Vec::new()),
            RulesetReportFilter::new().with_rule(|_| true, dispatcher.clone()),
        )
        .await
        .unwrap();
    first.wait_terminated(Some(TIMEOUT)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(dispatcher.is_alive());

    let records: Vec<Value> = (0..10).map(hwpc_record).collect();
    pipeline
        .add_puller(
            "puller-b",
            MemorySource::new(ReportKind::Hwpc, records),
            RulesetReportFilter::new().with_rule(|_| true, dispatcher.clone()),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), pipeline.join())
        .await
        .expect("pipeline did not finish")
        .unwrap();
    assert_eq!(sink.reports().await.len(), 20);
    assert!(!dispatcher.is_alive());
}

#[tokio::test]
async fn test_processor_stage_between_puller_and_dispatcher() {
    init_logs();
    let mut pipeline = Pipeline::new(batch_config()).unwrap();
    let sink = MemorySink::new();
    pipeline.add_pusher("pusher", sink.clone()).await.unwrap();
    let dispatcher = pipeline
        .add_dispatcher("dispatcher", route_table(), dummy_factory())
        .await
        .unwrap();

    // Odd timestamps are dropped, the rest are renamed
    let modifier = |mut report: Report| {
        if report.timestamp.timestamp_millis() % 2 == 1 {
            return None;
        }
        report.target = "host".to_string();
        Some(report)
    };
    let processor = pipeline
        .add_processor("processor", modifier, vec![dispatcher])
        .await
        .unwrap();

    let records: Vec<Value> = (0..10).map(hwpc_record).collect();
    pipeline
        .add_puller(
            "puller",
            MemorySource::new(ReportKind::Hwpc, records),
            RulesetReportFilter::new().with_rule(|_| true, processor),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), pipeline.join())
        .await
        .expect("pipeline did not finish")
        .unwrap();

    let saved = sink.reports().await;
    assert_eq!(saved.len(), 10);
    assert!(saved.iter().all(|r| r.target == "host"));
    assert_eq!(
        exit_order(pipeline.drain_events()),
        vec!["puller", "processor", "dispatcher", "pusher"]
    );
}
