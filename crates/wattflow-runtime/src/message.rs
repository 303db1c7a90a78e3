//! Messages exchanged between actors
//!
//! TigerStyle: Closed set of variants, explicit kind tags for handler lookup.

use crate::handle::{ActorHandle, Recipient};
use crate::route::FormulaId;
use std::fmt;
use wattflow_core::report::{Report, ReportKind};

/// A message delivered through an actor's control or data channel
#[derive(Debug, Clone)]
pub enum Message {
    /// Start handshake; the receiver records `reply_to` as its parent
    Start {
        payload: StartPayload,
        reply_to: Recipient,
    },
    /// Positive answer to a start handshake
    Ok { sender: String },
    /// Negative answer to a start handshake
    Error { sender: String, reason: String },
    /// Shutdown command; a soft pill drains queued data first
    PoisonPill { soft: bool },
    /// Measurement report
    Report(Report),
    /// Upstream producer finished emitting
    End { sender: String },
    /// A formula failed while processing the report tagged with `seq`
    PoisonNotification {
        sender: String,
        seq: u32,
        detail: String,
    },
    /// Ask the receiver to tear down and stop
    ExitRequest,
    /// A child actor terminated
    ChildExited { name: String },
}

impl Message {
    /// Kind tag used for handler lookup
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Start { .. } => MessageKind::Start,
            Self::Ok { .. } => MessageKind::Ok,
            Self::Error { .. } => MessageKind::Error,
            Self::PoisonPill { .. } => MessageKind::PoisonPill,
            Self::Report(report) => MessageKind::from(report.kind),
            Self::End { .. } => MessageKind::End,
            Self::PoisonNotification { .. } => MessageKind::PoisonNotification,
            Self::ExitRequest => MessageKind::ExitRequest,
            Self::ChildExited { .. } => MessageKind::ChildExited,
        }
    }

    /// Dispatcher sequence tag carried by a report, if any
    pub fn dispatch_seq(&self) -> Option<u32> {
        match self {
            Self::Report(report) => report.dispatch_seq,
            _ => None,
        }
    }

    /// Check if the message is handled by the actor core itself
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Start { .. } | Self::PoisonPill { .. } | Self::ExitRequest
        )
    }
}

/// Kind tag of a message
///
/// Report kinds are concrete; [`MessageKind::Report`] is their common parent
/// and only matches when a handler is registered with subtypes included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Start,
    Ok,
    Error,
    PoisonPill,
    Report,
    HwpcReport,
    PowerReport,
    ProcfsReport,
    End,
    PoisonNotification,
    ExitRequest,
    ChildExited,
}

impl MessageKind {
    /// Parent kind in the message hierarchy
    pub fn parent(&self) -> Option<MessageKind> {
        match self {
            Self::HwpcReport | Self::PowerReport | Self::ProcfsReport => Some(Self::Report),
            _ => None,
        }
    }
}

impl From<ReportKind> for MessageKind {
    fn from(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Hwpc => Self::HwpcReport,
            ReportKind::Power => Self::PowerReport,
            ReportKind::Procfs => Self::ProcfsReport,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Payload of a start handshake
#[derive(Debug, Clone)]
pub enum StartPayload {
    /// No domain values
    Generic,
    /// Values a formula needs to run
    Formula(FormulaStart),
}

impl StartPayload {
    /// Concrete kind of the payload
    pub fn kind(&self) -> StartKind {
        match self {
            Self::Generic => StartKind::Generic,
            Self::Formula(_) => StartKind::Formula,
        }
    }
}

/// Concrete kind of a start payload expected by an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    Generic,
    Formula,
}

impl fmt::Display for StartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "Start"),
            Self::Formula => write!(f, "FormulaStart"),
        }
    }
}

/// Domain values sent by a dispatcher to a formula it creates
#[derive(Debug, Clone)]
pub struct FormulaStart {
    pub device_id: String,
    pub formula_id: FormulaId,
    pub formula_name: String,
    pub pushers: Vec<ActorHandle>,
}
