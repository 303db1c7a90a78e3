//! Report filters
//!
//! TigerStyle: Rules evaluated in registration order, no hidden defaults.
//!
//! A puller hands every report it reads to a filter, which picks the
//! dispatchers the report goes to.

use crate::handle::ActorHandle;
use std::collections::HashSet;
use wattflow_core::report::Report;

/// Predicate selecting reports for a destination
pub type ReportRule = Box<dyn Fn(&Report) -> bool + Send + Sync>;

/// Routing from reports to destination actors
pub trait ReportFilter: Send + Sync {
    /// Send reports accepted by `rule` to `destination`
    fn register(&mut self, rule: ReportRule, destination: ActorHandle);

    /// Destinations of a report, in registration order
    fn route(&self, report: &Report) -> Vec<&ActorHandle>;

    /// Every registered destination, once each
    fn destinations(&self) -> Vec<&ActorHandle>;

    /// Number of registered rules
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unique_by_name<'a>(handles: impl Iterator<Item = &'a ActorHandle>) -> Vec<&'a ActorHandle> {
    let mut seen = HashSet::new();
    handles.filter(|h| seen.insert(h.name())).collect()
}

/// Filter holding one rule per destination
///
/// A report goes to every destination whose rule accepts it. A destination
/// registered under several matching rules receives the report once per
/// matching rule.
#[derive(Default)]
pub struct RulesetReportFilter {
    rules: Vec<(ReportRule, ActorHandle)>,
}

impl RulesetReportFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ReportFilter::register`]
    pub fn with_rule(
        mut self,
        rule: impl Fn(&Report) -> bool + Send + Sync + 'static,
        destination: ActorHandle,
    ) -> Self {
        self.register(Box::new(rule), destination);
        self
    }
}

impl ReportFilter for RulesetReportFilter {
    fn register(&mut self, rule: ReportRule, destination: ActorHandle) {
        self.rules.push((rule, destination));
    }

    fn route(&self, report: &Report) -> Vec<&ActorHandle> {
        self.rules
            .iter()
            .filter(|(rule, _)| rule(report))
            .map(|(_, destination)| destination)
            .collect()
    }

    fn destinations(&self) -> Vec<&ActorHandle> {
        unique_by_name(self.rules.iter().map(|(_, d)| d))
    }

    fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Filter sending every report to every destination
///
/// Rules passed to `register` are ignored.
#[derive(Default)]
pub struct BroadcastReportFilter {
    destinations: Vec<ActorHandle>,
}

impl BroadcastReportFilter {
    pub fn new(destinations: Vec<ActorHandle>) -> Self {
        Self { destinations }
    }
}

impl ReportFilter for BroadcastReportFilter {
    fn register(&mut self, _rule: ReportRule, destination: ActorHandle) {
        self.destinations.push(destination);
    }

    fn route(&self, _report: &Report) -> Vec<&ActorHandle> {
        unique_by_name(self.destinations.iter())
    }

    fn destinations(&self) -> Vec<&ActorHandle> {
        unique_by_name(self.destinations.iter())
    }

    fn len(&self) -> usize {
        self.destinations.len()
    }
}
