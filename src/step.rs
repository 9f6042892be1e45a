//! Migration steps
//!
//! A step is one atomic unit of schema change. Its number is assigned by
//! append order inside the owning manifest and is the only part of a step
//! that is ever persisted. Actions are held as boxed closures over a closed
//! set of shapes: table definitions for create, table alterations for
//! modify, and raw statement producers that receive the manifest and step
//! as explicit context.

use std::fmt;

use crate::manifest::Manifest;
use crate::schema::{TableAlteration, TableBlueprint};

/// Step kind, dispatched on during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Creates the manifest's table; rolls back as DROP TABLE IF EXISTS
    Create,
    /// Alters the manifest's table; requires an explicit down action
    Modify,
    /// Produces raw SQL statements; requires an explicit down action
    Raw,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Create => write!(f, "create"),
            StepKind::Modify => write!(f, "modify"),
            StepKind::Raw => write!(f, "raw"),
        }
    }
}

/// Table-definition callback for create steps
pub type DefineFn = Box<dyn Fn(&mut TableBlueprint) + Send + Sync>;

/// Table-alteration callback for modify steps
pub type ChangeFn = Box<dyn Fn(&mut TableAlteration) + Send + Sync>;

/// Raw statement producer; receives the owning manifest and the step itself
pub type RawFn = Box<dyn Fn(&Manifest, &Step) -> Vec<String> + Send + Sync>;

/// Lifecycle hook callback
pub type HookFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A step action, matched against the step kind at planning time
pub enum StepAction {
    Define(DefineFn),
    Change(ChangeFn),
    Raw(RawFn),
}

impl StepAction {
    /// Short name used in invalid-step diagnostics
    pub(crate) fn shape(&self) -> &'static str {
        match self {
            StepAction::Define(_) => "table definition",
            StepAction::Change(_) => "table alteration",
            StepAction::Raw(_) => "raw statements",
        }
    }
}

/// Lifecycle points at which step hooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeUp,
    AfterUp,
    BeforeDown,
    AfterDown,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::BeforeUp => write!(f, "before-up"),
            HookPoint::AfterUp => write!(f, "after-up"),
            HookPoint::BeforeDown => write!(f, "before-down"),
            HookPoint::AfterDown => write!(f, "after-down"),
        }
    }
}

#[derive(Default)]
struct Hooks {
    before_up: Vec<HookFn>,
    after_up: Vec<HookFn>,
    before_down: Vec<HookFn>,
    after_down: Vec<HookFn>,
}

impl Hooks {
    fn list(&self, point: HookPoint) -> &[HookFn] {
        match point {
            HookPoint::BeforeUp => &self.before_up,
            HookPoint::AfterUp => &self.after_up,
            HookPoint::BeforeDown => &self.before_down,
            HookPoint::AfterDown => &self.after_down,
        }
    }

    fn list_mut(&mut self, point: HookPoint) -> &mut Vec<HookFn> {
        match point {
            HookPoint::BeforeUp => &mut self.before_up,
            HookPoint::AfterUp => &mut self.after_up,
            HookPoint::BeforeDown => &mut self.before_down,
            HookPoint::AfterDown => &mut self.after_down,
        }
    }
}

/// A single atomic schema change inside a manifest
pub struct Step {
    number: i32,
    kind: StepKind,
    up: StepAction,
    down: Option<StepAction>,
    description: Option<String>,
    without_transaction: bool,
    hooks: Hooks,
}

impl Step {
    pub(crate) fn new(number: i32, kind: StepKind, up: StepAction, down: Option<StepAction>) -> Self {
        Self {
            number,
            kind,
            up,
            down,
            description: None,
            without_transaction: false,
            hooks: Hooks::default(),
        }
    }

    /// 1-based number, assigned by position in the owning manifest
    pub fn number(&self) -> i32 {
        self.number
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn up(&self) -> &StepAction {
        &self.up
    }

    pub fn down(&self) -> Option<&StepAction> {
        self.down.as_ref()
    }

    /// Free-text description, surfaced in status reports
    pub fn description(&mut self, text: impl Into<String>) -> &mut Self {
        self.description = Some(text.into());
        self
    }

    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Opt this step out of the wrapping transaction
    pub fn without_transaction(&mut self) -> &mut Self {
        self.without_transaction = true;
        self
    }

    pub fn is_without_transaction(&self) -> bool {
        self.without_transaction
    }

    /// Register a lifecycle hook; hooks run in registration order
    pub fn hook(
        &mut self,
        point: HookPoint,
        f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.hooks.list_mut(point).push(Box::new(f));
        self
    }

    /// Run all hooks for a lifecycle point, stopping at the first error.
    /// There is no error isolation between hooks: a failure aborts the step.
    pub(crate) fn run_hooks(&self, point: HookPoint) -> anyhow::Result<()> {
        for hook in self.hooks.list(point) {
            hook()?;
        }
        Ok(())
    }
}
