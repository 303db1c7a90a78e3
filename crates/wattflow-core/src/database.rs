//! Database interfaces consumed by pullers and pushers
//!
//! TigerStyle: Explicit connect step, explicit error per failure kind.
//!
//! Concrete backends live outside this crate. The in-memory implementations
//! below back the tests and local pipelines.

use crate::error::{Error, Result};
use crate::report::{Report, ReportKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::instrument;

/// Source of raw records read by a puller
///
/// Reads are blocking and run on a dedicated blocking thread, never on the
/// async executor.
pub trait ReadableDatabase: Send + 'static {
    /// Kind of report the raw records decode into
    fn report_kind(&self) -> ReportKind;

    /// Open the connection
    ///
    /// # Errors
    /// Returns `DatabaseConnectFailed` if the backend is unreachable.
    fn connect(&mut self) -> Result<()>;

    /// Lazily iterate over the records currently available
    ///
    /// The iterator ends when the source is exhausted. In stream mode the
    /// caller polls again later for newly arrived records.
    fn iter(&mut self, stream_mode: bool) -> Result<Box<dyn Iterator<Item = Value> + '_>>;

    /// Close the connection
    fn disconnect(&mut self) {}
}

/// Destination of the reports produced by a pipeline
#[async_trait]
pub trait WritableDatabase: Send + Sync + 'static {
    /// Open the connection
    async fn connect(&mut self) -> Result<()>;

    /// Store a single report
    async fn save(&mut self, report: &Report) -> Result<()>;

    /// Store a batch of reports
    async fn save_many(&mut self, reports: &[Report]) -> Result<()> {
        for report in reports {
            self.save(report).await?;
        }
        Ok(())
    }

    /// Close the connection
    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// MemorySource
// =============================================================================

/// In-memory record source
///
/// Clones share the same queue, so a test can keep a clone and push more
/// records while a puller is reading.
#[derive(Clone)]
pub struct MemorySource {
    kind: ReportKind,
    records: Arc<Mutex<VecDeque<Value>>>,
    fail_connect: bool,
    connected: bool,
}

impl MemorySource {
    /// Create a source yielding the given records
    pub fn new(kind: ReportKind, records: impl IntoIterator<Item = Value>) -> Self {
        Self {
            kind,
            records: Arc::new(Mutex::new(records.into_iter().collect())),
            fail_connect: false,
            connected: false,
        }
    }

    /// Make `connect` fail
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Append a record
    pub fn push(&self, record: Value) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::internal("memory source lock poisoned"))?
            .push_back(record);
        Ok(())
    }

    /// Number of records not yet read
    pub fn remaining(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl ReadableDatabase for MemorySource {
    fn report_kind(&self) -> ReportKind {
        self.kind
    }

    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(Error::DatabaseConnectFailed {
                reason: "memory source configured to refuse connections".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn iter(&mut self, _stream_mode: bool) -> Result<Box<dyn Iterator<Item = Value> + '_>> {
        if !self.connected {
            return Err(Error::DatabaseReadFailed {
                reason: "not connected".into(),
            });
        }
        let drained: Vec<Value> = self
            .records
            .lock()
            .map_err(|_| Error::internal("memory source lock poisoned"))?
            .drain(..)
            .collect();
        Ok(Box::new(drained.into_iter()))
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

// =============================================================================
// MemorySink
// =============================================================================

/// In-memory report sink
///
/// Clones share storage, so a test keeps a clone to inspect what a pusher
/// wrote.
#[derive(Clone, Default)]
pub struct MemorySink {
    reports: Arc<RwLock<Vec<Report>>>,
    batches: Arc<RwLock<Vec<usize>>>,
    fail_connect: bool,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect` fail
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Toggle write failures at runtime
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every stored report, in write order
    pub async fn reports(&self) -> Vec<Report> {
        self.reports.read().await.clone()
    }

    /// Sizes of the batches written through `save_many`
    pub async fn batches(&self) -> Vec<usize> {
        self.batches.read().await.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::DatabaseWriteFailed {
                reason: "memory sink configured to refuse writes".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WritableDatabase for MemorySink {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(Error::DatabaseConnectFailed {
                reason: "memory sink configured to refuse connections".into(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, report), fields(sensor = %report.sensor))]
    async fn save(&mut self, report: &Report) -> Result<()> {
        self.check_writable()?;
        self.reports.write().await.push(report.clone());
        Ok(())
    }

    #[instrument(skip(self, reports), fields(count = reports.len()))]
    async fn save_many(&mut self, reports: &[Report]) -> Result<()> {
        self.check_writable()?;
        self.reports.write().await.extend_from_slice(reports);
        self.batches.write().await.push(reports.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_memory_source_requires_connect() {
        let mut source = MemorySource::new(ReportKind::Power, vec![json!({})]);
        assert!(source.iter(false).is_err());
        source.connect().unwrap();
        assert_eq!(source.iter(false).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_source_drains_on_read() {
        let mut source = MemorySource::new(ReportKind::Power, vec![json!(1), json!(2)]);
        let view = source.clone();
        source.connect().unwrap();
        assert_eq!(source.iter(true).unwrap().count(), 2);
        assert_eq!(source.iter(true).unwrap().count(), 0);

        view.push(json!(3)).unwrap();
        assert_eq!(source.iter(true).unwrap().collect::<Vec<_>>(), vec![json!(3)]);
    }

    #[test]
    fn test_memory_source_connect_failure() {
        let mut source = MemorySource::new(ReportKind::Hwpc, vec![]).with_connect_failure();
        assert!(matches!(
            source.connect(),
            Err(Error::DatabaseConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_sink_records_batches() {
        let mut sink = MemorySink::new();
        let view = sink.clone();
        sink.connect().await.unwrap();

        let reports = vec![
            Report::power(Utc::now(), "s1", "t1", 1.0),
            Report::power(Utc::now(), "s1", "t2", 2.0),
        ];
        sink.save_many(&reports).await.unwrap();
        sink.save(&reports[0]).await.unwrap();

        assert_eq!(view.reports().await.len(), 3);
        assert_eq!(view.batches().await, vec![2]);
    }

    #[tokio::test]
    async fn test_memory_sink_write_failure() {
        let mut sink = MemorySink::new();
        sink.set_fail_writes(true);
        let report = Report::power(Utc::now(), "s1", "t1", 1.0);
        assert!(matches!(
            sink.save_many(&[report]).await,
            Err(Error::DatabaseWriteFailed { .. })
        ));
        assert!(sink.reports().await.is_empty());
    }
}
