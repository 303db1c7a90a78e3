//! Report pusher
//!
//! TigerStyle: Bounded buffer, time- and size-triggered flushes.
//!
//! A pusher buffers the reports formulas send it and writes them to a
//! database in timestamp order. A flush happens when the flush interval has
//! elapsed, when the buffer grows past its size limit, when an upstream
//! dispatcher ends, and on teardown.

use crate::actor::{ActorContext, ActorRole, Behavior, Handler, HandlerTable};
use crate::message::{Message, MessageKind, StartPayload};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use wattflow_core::config::PusherConfig;
use wattflow_core::database::WritableDatabase;
use wattflow_core::error::Result;
use wattflow_core::report::Report;

/// Pusher actor behavior
pub struct PusherBehavior {
    db: Box<dyn WritableDatabase>,
    config: PusherConfig,
    buffer: Vec<Report>,
    last_flush: Instant,
    saved: u64,
    ends_received: usize,
}

impl PusherBehavior {
    pub fn new(db: Box<dyn WritableDatabase>, config: PusherConfig) -> Self {
        Self {
            db,
            config,
            buffer: Vec::new(),
            last_flush: Instant::now(),
            saved: 0,
            ends_received: 0,
        }
    }

    fn flush_due(&self) -> bool {
        self.buffer.len() > self.config.max_buffer_size
            || self.last_flush.elapsed() >= self.config.flush_interval()
    }

    /// Write the buffer in timestamp order
    ///
    /// On a write error the buffer is kept for the next flush.
    #[instrument(skip(self), fields(buffered = self.buffer.len()), level = "debug")]
    async fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return;
        }

        self.buffer.sort_by_key(|report| report.timestamp);
        match self.db.save_many(&self.buffer).await {
            Ok(()) => {
                self.saved += self.buffer.len() as u64;
                debug!(count = self.buffer.len(), "Buffer flushed");
                self.buffer.clear();
            }
            Err(e) => warn!(error = %e, "Flush failed, reports kept"),
        }
    }
}

struct ReportHandler;

#[async_trait]
impl Handler<PusherBehavior> for ReportHandler {
    async fn handle(
        &self,
        pusher: &mut PusherBehavior,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::Report(mut report) = msg {
            report.dispatch_seq = None;
            pusher.buffer.push(report);
            if pusher.flush_due() {
                pusher.flush().await;
            }
        }
        Ok(())
    }
}

struct EndHandler;

#[async_trait]
impl Handler<PusherBehavior> for EndHandler {
    async fn handle(
        &self,
        pusher: &mut PusherBehavior,
        _ctx: &mut ActorContext,
        msg: Message,
    ) -> Result<()> {
        if let Message::End { sender } = msg {
            pusher.ends_received += 1;
            debug!(sender = %sender, received = pusher.ends_received, "End received");
            pusher.flush().await;
        }
        Ok(())
    }
}

#[async_trait]
impl Behavior for PusherBehavior {
    fn role(&self) -> ActorRole {
        ActorRole::Pusher
    }

    fn receive_timeout(&self) -> Option<Duration> {
        Some(self.config.flush_interval())
    }

    fn register_handlers(&self, table: &mut HandlerTable<Self>) {
        table.add_handler(MessageKind::Report, ReportHandler, true);
        table.add_handler(MessageKind::End, EndHandler, false);
    }

    async fn initialize(&mut self, _ctx: &mut ActorContext, _payload: StartPayload) -> Result<()> {
        self.db.connect().await?;
        self.last_flush = Instant::now();
        info!(
            max_buffer_size = self.config.max_buffer_size,
            flush_interval_ms = self.config.flush_interval_ms,
            "Pusher ready"
        );
        Ok(())
    }

    async fn on_timeout(&mut self, _ctx: &mut ActorContext) -> Result<()> {
        self.flush().await;
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &mut ActorContext, _graceful: bool) {
        self.flush().await;
        if !self.buffer.is_empty() {
            warn!(lost = self.buffer.len(), "Reports not written before stop");
        }
        if let Err(e) = self.db.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        info!(saved = self.saved, ends = self.ends_received, "Pusher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::handle::{ActorHandle, Recipient};
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;
    use wattflow_core::config::ActorConfig;
    use wattflow_core::database::MemorySink;

    fn report_at(ms: i64) -> Report {
        let ts = Utc.timestamp_millis_opt(ms).unwrap();
        Report::power(ts, "s1", "t", ms as f64)
    }

    async fn start_pusher(
        sink: MemorySink,
        config: PusherConfig,
    ) -> (ActorHandle, mpsc::UnboundedReceiver<Message>) {
        let handle = Actor::new(
            "pusher",
            PusherBehavior::new(Box::new(sink), config),
            ActorConfig::default(),
        )
        .unwrap()
        .spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .send_control(Message::Start {
                payload: StartPayload::Generic,
                reply_to: Recipient::new("test", tx),
            })
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Ok { .. })));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_size_triggered_flush_sorts_by_timestamp() {
        let sink = MemorySink::new();
        let config = PusherConfig {
            flush_interval_ms: 60_000,
            max_buffer_size: 2,
        };
        let (pusher, _rx) = start_pusher(sink.clone(), config).await;

        for ms in [30, 10, 20] {
            pusher.send_data(Message::Report(report_at(ms))).unwrap();
        }
        pusher.kill(true).unwrap();
        pusher
            .wait_terminated(Some(Duration::from_secs(1)))
            .await
            .unwrap();

        let saved: Vec<f64> = sink
            .reports()
            .await
            .into_iter()
            .filter_map(|r| r.power)
            .collect();
        assert_eq!(saved, vec![10.0, 20.0, 30.0]);
        assert_eq!(sink.batches().await, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_flush() {
        let sink = MemorySink::new();
        let (pusher, _rx) = start_pusher(sink.clone(), PusherConfig::default()).await;

        pusher.send_data(Message::Report(report_at(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.reports().await.len(), 1);
        assert!(pusher.is_alive());
    }

    #[tokio::test]
    async fn test_end_flushes_without_stopping() {
        let sink = MemorySink::new();
        let config = PusherConfig {
            flush_interval_ms: 60_000,
            max_buffer_size: 100,
        };
        let (pusher, _rx) = start_pusher(sink.clone(), config).await;

        pusher.send_data(Message::Report(report_at(1))).unwrap();
        pusher
            .send_data(Message::End {
                sender: "dispatcher".into(),
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while sink.reports().await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sink.reports().await.len(), 1);
        assert!(pusher.is_alive());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_buffer() {
        let sink = MemorySink::new();
        let config = PusherConfig {
            flush_interval_ms: 60_000,
            max_buffer_size: 0,
        };
        let (pusher, _rx) = start_pusher(sink.clone(), config).await;

        sink.set_fail_writes(true);
        pusher.send_data(Message::Report(report_at(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.reports().await.is_empty());

        sink.set_fail_writes(false);
        pusher.kill(true).unwrap();
        pusher
            .wait_terminated(Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(sink.reports().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_refuses_start() {
        let sink = MemorySink::new().with_connect_failure();
        let handle = Actor::new(
            "pusher",
            PusherBehavior::new(Box::new(sink), PusherConfig::default()),
            ActorConfig::default(),
        )
        .unwrap()
        .spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .send_control(Message::Start {
                payload: StartPayload::Generic,
                reply_to: Recipient::new("test", tx),
            })
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Error { .. })));
    }
}
