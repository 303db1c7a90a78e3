//! Wattflow Runtime
//!
//! Actor runtime, supervision and report routing for the wattflow pipeline.
//!
//! # Overview
//!
//! The runtime provides:
//! - A generic actor core with a two-channel mailbox and a start handshake
//! - Supervision with ordered, graceful pipeline shutdown
//! - Pullers, processors, dispatchers, formulas and pushers built on that core
//! - Crash-loop detection and restart of failing formulas
//!
//! # TigerStyle
//! - One task per actor, handlers run one at a time
//! - Explicit lifecycle states
//! - Bounded drain on shutdown (no unbounded waits)

pub mod actor;
pub mod blocking;
pub mod dispatcher;
pub mod filter;
pub mod formula;
pub mod handle;
pub mod lifecycle;
pub mod mailbox;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod puller;
pub mod pusher;
pub mod route;
pub mod supervisor;

pub use actor::{
    Actor, ActorContext, ActorRole, Behavior, FailurePolicy, Handler, HandlerTable,
    ALREADY_INITIALIZED_REASON,
};
pub use blocking::{BlockingDetector, BlockingState};
pub use dispatcher::DispatcherBehavior;
pub use filter::{BroadcastReportFilter, ReportFilter, ReportRule, RulesetReportFilter};
pub use formula::{DummyFormula, FnFormulaFactory, Formula, FormulaBehavior, FormulaFactory};
pub use handle::{ActorHandle, Recipient};
pub use lifecycle::LifecycleState;
pub use mailbox::{Mailbox, MailboxSenders, Received};
pub use message::{FormulaStart, Message, MessageKind, StartKind, StartPayload};
pub use pipeline::Pipeline;
pub use processor::{ProcessorBehavior, ReportModifier};
pub use puller::PullerBehavior;
pub use pusher::PusherBehavior;
pub use route::{
    DispatchRule, FnDispatchRule, FormulaId, HwpcDepthLevel, HwpcDispatchRule, PowerDispatchRule,
    RouteTable,
};
pub use supervisor::{PipelineSupervisor, Supervisor};
