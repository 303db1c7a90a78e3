//! Route table and dispatch rules
//!
//! TigerStyle: Rules fixed at construction, exactly one primary rule.
//!
//! A dispatch rule derives formula ids from a report. The primary rule defines
//! the most specific id schema; ids produced by other rules are reconciled
//! against it so they address a prefix of the primary id space.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use wattflow_core::error::{Error, Result};
use wattflow_core::report::{Report, ReportKind};

// =============================================================================
// FormulaId
// =============================================================================

/// Ordered routing key of a formula
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormulaId(Vec<String>);

impl FormulaId {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(components.into_iter().map(Into::into).collect())
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep the first `len` components
    pub fn truncated(&self, len: usize) -> Self {
        Self(self.0.iter().take(len).cloned().collect())
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(","))
    }
}

// =============================================================================
// DispatchRule
// =============================================================================

/// Policy deriving formula ids from a report
///
/// `formula_ids` must be pure: the same report always yields the same ids.
pub trait DispatchRule: Send + Sync {
    /// Names of the id components, in order
    fn fields(&self) -> &[String];

    /// Whether this rule defines the canonical id schema
    fn is_primary(&self) -> bool;

    /// Formula ids the report is addressed to
    fn formula_ids(&self, report: &Report) -> Vec<FormulaId>;
}

fn field_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Grouping level of a hardware counter report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwpcDepthLevel {
    Target,
    Root,
    Socket,
    Core,
}

/// Dispatch rule for hardware counter reports
#[derive(Debug, Clone)]
pub struct HwpcDispatchRule {
    depth: HwpcDepthLevel,
    primary: bool,
    fields: Vec<String>,
}

impl HwpcDispatchRule {
    pub fn new(depth: HwpcDepthLevel, primary: bool) -> Self {
        let fields = match depth {
            HwpcDepthLevel::Target => field_names(&["target"]),
            HwpcDepthLevel::Root => field_names(&["sensor"]),
            HwpcDepthLevel::Socket => field_names(&["sensor", "socket"]),
            HwpcDepthLevel::Core => field_names(&["sensor", "socket", "core"]),
        };
        Self {
            depth,
            primary,
            fields,
        }
    }

    pub fn depth(&self) -> HwpcDepthLevel {
        self.depth
    }
}

impl DispatchRule for HwpcDispatchRule {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn formula_ids(&self, report: &Report) -> Vec<FormulaId> {
        match self.depth {
            HwpcDepthLevel::Target => vec![FormulaId::new([report.target.as_str()])],
            HwpcDepthLevel::Root => vec![FormulaId::new([report.sensor.as_str()])],
            HwpcDepthLevel::Socket => non_shared_group(report)
                .map(|group| {
                    group
                        .keys()
                        .map(|socket| FormulaId::new([report.sensor.as_str(), socket.as_str()]))
                        .collect()
                })
                .unwrap_or_default(),
            HwpcDepthLevel::Core => non_shared_group(report)
                .map(|group| {
                    group
                        .iter()
                        .flat_map(|(socket, cores)| {
                            cores.keys().map(move |core| {
                                FormulaId::new([
                                    report.sensor.as_str(),
                                    socket.as_str(),
                                    core.as_str(),
                                ])
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

type SocketGroup = std::collections::BTreeMap<
    String,
    std::collections::BTreeMap<String, wattflow_core::report::EventCounters>,
>;

/// Group with the most cores per socket
///
/// Shared groups (RAPL, PCU) report one pseudo-core per socket, so the
/// widest group is the per-core one.
fn non_shared_group(report: &Report) -> Option<&SocketGroup> {
    let mut widest: Option<(&SocketGroup, usize)> = None;
    for group in report.groups.values() {
        let cores = group.values().next().map(|cores| cores.len()).unwrap_or(0);
        if widest.map_or(true, |(_, max)| cores > max) {
            widest = Some((group, cores));
        }
    }
    widest.map(|(group, _)| group)
}

/// Dispatch rule for power reports
#[derive(Debug, Clone)]
pub struct PowerDispatchRule {
    by_target: bool,
    primary: bool,
    fields: Vec<String>,
}

impl PowerDispatchRule {
    /// Group by sensor, and by target too when `by_target` is set
    pub fn new(by_target: bool, primary: bool) -> Self {
        let fields = if by_target {
            field_names(&["sensor", "target"])
        } else {
            field_names(&["sensor"])
        };
        Self {
            by_target,
            primary,
            fields,
        }
    }
}

impl DispatchRule for PowerDispatchRule {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn formula_ids(&self, report: &Report) -> Vec<FormulaId> {
        if self.by_target {
            vec![FormulaId::new([
                report.sensor.as_str(),
                report.target.as_str(),
            ])]
        } else {
            vec![FormulaId::new([report.sensor.as_str()])]
        }
    }
}

/// Id extraction function of a [`FnDispatchRule`]
pub type FormulaIdFn = Box<dyn Fn(&Report) -> Vec<FormulaId> + Send + Sync>;

/// Dispatch rule backed by a closure
pub struct FnDispatchRule {
    fields: Vec<String>,
    primary: bool,
    extract: FormulaIdFn,
}

impl FnDispatchRule {
    pub fn new<F>(fields: &[&str], primary: bool, extract: F) -> Self
    where
        F: Fn(&Report) -> Vec<FormulaId> + Send + Sync + 'static,
    {
        Self {
            fields: field_names(fields),
            primary,
            extract: Box::new(extract),
        }
    }
}

impl DispatchRule for FnDispatchRule {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn formula_ids(&self, report: &Report) -> Vec<FormulaId> {
        (self.extract)(report)
    }
}

// =============================================================================
// RouteTable
// =============================================================================

/// Ordered mapping from report kind to dispatch rule
#[derive(Default, Clone)]
pub struct RouteTable {
    rules: Vec<(ReportKind, Arc<dyn DispatchRule>)>,
    primary: Option<usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rule for a report kind
    ///
    /// # Errors
    /// - `PrimaryRuleAlreadyDefined` for a second primary rule
    /// - `InvalidConfiguration` for a primary rule without fields or a kind
    ///   registered twice
    pub fn add_rule(&mut self, kind: ReportKind, rule: impl DispatchRule + 'static) -> Result<()> {
        if self.rules.iter().any(|(k, _)| *k == kind) {
            return Err(Error::invalid_configuration(
                "route_table",
                format!("a rule is already registered for {}", kind),
            ));
        }
        if rule.is_primary() {
            if self.primary.is_some() {
                return Err(Error::PrimaryRuleAlreadyDefined);
            }
            if rule.fields().is_empty() {
                return Err(Error::invalid_configuration(
                    "route_table",
                    "the primary rule must declare at least one field",
                ));
            }
            self.primary = Some(self.rules.len());
        }
        self.rules.push((kind, Arc::new(rule)));
        Ok(())
    }

    /// Rule registered for a report kind
    pub fn get_dispatch_rule(&self, kind: ReportKind) -> Option<&Arc<dyn DispatchRule>> {
        self.rules.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    /// The primary rule
    pub fn primary(&self) -> Option<&Arc<dyn DispatchRule>> {
        self.primary.map(|index| &self.rules[index].1)
    }

    /// Number of fields of the primary id schema
    pub fn primary_field_count(&self) -> usize {
        self.primary().map(|rule| rule.fields().len()).unwrap_or(0)
    }

    /// Map a rule's ids onto the primary id schema
    ///
    /// Ids of the primary rule are returned as is. Other ids are cut at the
    /// first field that differs from the primary schema, then deduplicated.
    pub fn reconcile(&self, rule: &dyn DispatchRule, ids: Vec<FormulaId>) -> Vec<FormulaId> {
        if rule.is_primary() {
            return ids;
        }
        let primary_fields = match self.primary() {
            Some(primary) => primary.fields(),
            None => return Vec::new(),
        };

        let matching = rule
            .fields()
            .iter()
            .zip(primary_fields.iter())
            .take_while(|(field, primary_field)| field == primary_field)
            .count();

        ids.into_iter()
            .map(|id| {
                let len = matching.min(id.len());
                id.truncated(len)
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("kinds", &self.rules.iter().map(|(k, _)| *k).collect::<Vec<_>>())
            .field("primary", &self.primary)
            .finish()
    }
}
