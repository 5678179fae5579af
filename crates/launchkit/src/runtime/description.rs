//! Launch descriptions and the orchestration loop

use crate::config::{LaunchContext, SubstitutionError};
use crate::runtime::action::{Action, ActionError, ActionKind, DeclareArgument};
use crate::runtime::condition::{should_execute, Condition};
use crate::runtime::registry::ProcessRegistry;
use serde::Serialize;

/// Lifecycle of a launch description
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// An action with its optional guard
#[derive(Debug, Clone)]
pub struct LaunchEntry {
    pub action: Action,
    pub condition: Option<Condition>,
}

impl LaunchEntry {
    pub fn new(action: impl Into<Action>) -> Self {
        Self {
            action: action.into(),
            condition: None,
        }
    }

    pub fn conditional(action: impl Into<Action>, condition: Condition) -> Self {
        Self {
            action: action.into(),
            condition: Some(condition),
        }
    }
}

/// Ordered list of guarded actions, executed exactly in insertion order
///
/// No dependency inference is performed: arguments must be declared before
/// the actions that reference them.
#[derive(Debug, Default)]
pub struct LaunchDescription {
    entries: Vec<LaunchEntry>,
    state: RunState,
}

impl LaunchDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LaunchEntry>) -> Self {
        Self {
            entries,
            state: RunState::Idle,
        }
    }

    /// Append an unconditional action
    pub fn add_action(&mut self, action: impl Into<Action>) {
        self.entries.push(LaunchEntry::new(action));
    }

    /// Append an action guarded by `condition`
    pub fn add_conditional_action(&mut self, action: impl Into<Action>, condition: Condition) {
        self.entries.push(LaunchEntry::conditional(action, condition));
    }

    pub fn entries(&self) -> &[LaunchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Argument declarations reachable without running (groups included)
    pub fn declared_arguments(&self) -> Vec<&DeclareArgument> {
        let mut declared = Vec::new();
        collect_declarations(&self.entries, &mut declared);
        declared
    }

    /// Visit every entry in order, stopping at the first error
    ///
    /// Processes spawned before a failure are left running in `processes`;
    /// stopping them is up to the caller.
    pub fn run(
        &mut self,
        ctx: &mut LaunchContext,
        processes: &mut ProcessRegistry,
    ) -> Result<(), LaunchError> {
        if self.state != RunState::Idle {
            return Err(LaunchError::AlreadyRun(self.state));
        }

        self.state = RunState::Running;
        log::info!("Running launch description ({} actions)", self.entries.len());

        match run_entries(&self.entries, ctx, processes) {
            Ok(()) => {
                self.state = RunState::Completed;
                Ok(())
            }
            Err(e) => {
                self.state = RunState::Failed;
                log::error!("Launch failed: {}", e);
                Err(e)
            }
        }
    }
}

fn collect_declarations<'a>(entries: &'a [LaunchEntry], declared: &mut Vec<&'a DeclareArgument>) {
    for entry in entries {
        match &entry.action {
            Action::DeclareArgument(declare) => declared.push(declare),
            Action::Group(group) => collect_declarations(&group.entries, declared),
            _ => {}
        }
    }
}

/// The orchestration loop shared by descriptions, groups and includes
pub(crate) fn run_entries(
    entries: &[LaunchEntry],
    ctx: &mut LaunchContext,
    processes: &mut ProcessRegistry,
) -> Result<(), LaunchError> {
    for (index, entry) in entries.iter().enumerate() {
        let kind = entry.action.kind();

        let execute = should_execute(entry.condition.as_ref(), ctx)
            .map_err(|source| LaunchError::Condition { index, kind, source })?;
        if !execute {
            log::debug!("Skipping action #{} ({}): condition is false", index, kind);
            continue;
        }

        entry
            .action
            .visit(ctx, processes)
            .map_err(|source| LaunchError::Action { index, kind, source })?;
    }
    Ok(())
}

/// Errors that abort a launch run
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Condition of action #{index} ({kind}) could not be evaluated: {source}")]
    Condition {
        index: usize,
        kind: ActionKind,
        #[source]
        source: SubstitutionError,
    },

    #[error("Action #{index} ({kind}) failed: {source}")]
    Action {
        index: usize,
        kind: ActionKind,
        #[source]
        source: ActionError,
    },

    #[error("Launch description has already been run (state: {0:?})")]
    AlreadyRun(RunState),
}

impl LaunchError {
    /// Index of the failing action within its list
    pub fn index(&self) -> Option<usize> {
        match self {
            LaunchError::Condition { index, .. } | LaunchError::Action { index, .. } => {
                Some(*index)
            }
            LaunchError::AlreadyRun(_) => None,
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            LaunchError::Condition { kind, .. } | LaunchError::Action { kind, .. } => Some(*kind),
            LaunchError::AlreadyRun(_) => None,
        }
    }

    /// Whether the innermost cause is a substitution failure
    pub fn is_resolution(&self) -> bool {
        match self {
            LaunchError::Condition { .. } => true,
            LaunchError::Action { source, .. } => source.is_resolution(),
            LaunchError::AlreadyRun(_) => false,
        }
    }

    /// Whether the innermost cause is a spawn failure
    pub fn is_spawn(&self) -> bool {
        match self {
            LaunchError::Action { source, .. } => source.is_spawn(),
            _ => false,
        }
    }
}
