//! Actions: the units a launch description is made of

use crate::config::{
    ArgumentInfo, LaunchContext, LaunchFile, LaunchFileError, Substitution, SubstitutionError,
};
use crate::runtime::description::{run_entries, LaunchEntry, LaunchError};
use crate::runtime::process::{OutputPolicy, ProcessConfig, ProcessError};
use crate::runtime::registry::ProcessRegistry;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// One orchestration step
#[derive(Debug, Clone)]
pub enum Action {
    DeclareArgument(DeclareArgument),
    SetEnvironmentVariable(SetEnvironmentVariable),
    ExecuteProcess(ExecuteProcess),
    Group(Group),
    IncludeLaunchFile(IncludeLaunchFile),
}

/// Discriminant of an [`Action`], used in error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DeclareArgument,
    SetEnvironmentVariable,
    ExecuteProcess,
    Group,
    IncludeLaunchFile,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::DeclareArgument => "declare_argument",
            ActionKind::SetEnvironmentVariable => "set_environment_variable",
            ActionKind::ExecuteProcess => "execute_process",
            ActionKind::Group => "group",
            ActionKind::IncludeLaunchFile => "include_launch_file",
        };
        f.write_str(name)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::DeclareArgument(_) => ActionKind::DeclareArgument,
            Action::SetEnvironmentVariable(_) => ActionKind::SetEnvironmentVariable,
            Action::ExecuteProcess(_) => ActionKind::ExecuteProcess,
            Action::Group(_) => ActionKind::Group,
            Action::IncludeLaunchFile(_) => ActionKind::IncludeLaunchFile,
        }
    }

    /// Execute the action against the context
    pub fn visit(
        &self,
        ctx: &mut LaunchContext,
        processes: &mut ProcessRegistry,
    ) -> Result<(), ActionError> {
        match self {
            Action::DeclareArgument(action) => action.visit(ctx),
            Action::SetEnvironmentVariable(action) => action.visit(ctx),
            Action::ExecuteProcess(action) => action.visit(ctx, processes),
            Action::Group(action) => action.visit(ctx, processes),
            Action::IncludeLaunchFile(action) => action.visit(ctx, processes),
        }
    }
}

fn resolve(
    subst: &Substitution,
    ctx: &LaunchContext,
    what: impl FnOnce() -> String,
) -> Result<String, ActionError> {
    subst
        .resolve(ctx)
        .map_err(|source| ActionError::Resolution { what: what(), source })
}

/// Declares a launch argument with a default value
#[derive(Debug, Clone)]
pub struct DeclareArgument {
    pub name: String,
    pub default: Substitution,
    pub description: Option<String>,
}

impl DeclareArgument {
    pub fn new(name: impl Into<String>, default: impl Into<Substitution>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Install the default unless a value was supplied before the run
    fn visit(&self, ctx: &mut LaunchContext) -> Result<(), ActionError> {
        ctx.declare(
            self.name.clone(),
            ArgumentInfo {
                default: self.default.to_string(),
                description: self.description.clone(),
            },
        );

        if let Ok(value) = ctx.get_argument(&self.name) {
            log::debug!("Argument '{}' supplied as '{}'", self.name, value);
            return Ok(());
        }

        let value = resolve(&self.default, ctx, || {
            format!("default of argument '{}'", self.name)
        })?;
        log::debug!("Argument '{}' defaults to '{}'", self.name, value);
        ctx.set_argument(self.name.clone(), value);
        Ok(())
    }
}

/// Adds a variable to the environment of subsequently spawned processes
#[derive(Debug, Clone)]
pub struct SetEnvironmentVariable {
    pub name: String,
    pub value: Substitution,
}

impl SetEnvironmentVariable {
    pub fn new(name: impl Into<String>, value: impl Into<Substitution>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn visit(&self, ctx: &mut LaunchContext) -> Result<(), ActionError> {
        let value = resolve(&self.value, ctx, || {
            format!("environment variable '{}'", self.name)
        })?;
        log::debug!("Environment {}={}", self.name, value);
        ctx.set_environment_variable(self.name.clone(), value);
        Ok(())
    }
}

/// Spawns a child process
#[derive(Debug, Clone)]
pub struct ExecuteProcess {
    /// Explicit process name (basename of the executable otherwise)
    pub name: Option<String>,
    /// Executable followed by its arguments
    pub cmd: Vec<Substitution>,
    /// Working directory (the context's one otherwise)
    pub cwd: Option<Substitution>,
    /// Extra environment for this process only
    pub env: IndexMap<String, Substitution>,
    pub output: OutputPolicy,
}

impl ExecuteProcess {
    pub fn new(cmd: impl IntoIterator<Item = Substitution>) -> Self {
        Self {
            name: None,
            cmd: cmd.into_iter().collect(),
            cwd: None,
            env: IndexMap::new(),
            output: OutputPolicy::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<Substitution>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<Substitution>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    /// Resolve the command line, working directory and environment
    pub fn resolve(&self, ctx: &LaunchContext) -> Result<ProcessConfig, ActionError> {
        let mut cmd = Vec::with_capacity(self.cmd.len());
        for (i, part) in self.cmd.iter().enumerate() {
            cmd.push(resolve(part, ctx, || format!("command element {}", i))?);
        }

        let working_dir = match &self.cwd {
            Some(cwd) => Some(PathBuf::from(resolve(cwd, ctx, || {
                "working directory".to_string()
            })?)),
            None => ctx.working_directory().map(Path::to_path_buf),
        };

        let mut env = ctx.environment().clone();
        for (key, value) in &self.env {
            let resolved = resolve(value, ctx, || format!("environment variable '{}'", key))?;
            env.insert(key.clone(), resolved);
        }

        let name = self
            .name
            .clone()
            .unwrap_or_else(|| default_process_name(&cmd));

        Ok(ProcessConfig {
            name,
            cmd,
            env,
            working_dir,
            output: self.output,
        })
    }

    fn visit(
        &self,
        ctx: &mut LaunchContext,
        processes: &mut ProcessRegistry,
    ) -> Result<(), ActionError> {
        let config = self.resolve(ctx)?;
        processes.spawn(config)?;
        Ok(())
    }
}

fn default_process_name(cmd: &[String]) -> String {
    cmd.first()
        .and_then(|exe| Path::new(exe).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "process".to_string())
}

/// A nested list of guarded actions
#[derive(Debug, Clone)]
pub struct Group {
    pub entries: Vec<LaunchEntry>,
    /// Restore arguments and environment after the group
    pub scoped: bool,
    /// Working directory for actions inside the group
    pub cwd: Option<Substitution>,
}

impl Group {
    pub fn new(entries: Vec<LaunchEntry>) -> Self {
        Self {
            entries,
            scoped: true,
            cwd: None,
        }
    }

    pub fn with_scoped(mut self, scoped: bool) -> Self {
        self.scoped = scoped;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<Substitution>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn visit(
        &self,
        ctx: &mut LaunchContext,
        processes: &mut ProcessRegistry,
    ) -> Result<(), ActionError> {
        let cwd = match &self.cwd {
            Some(cwd) => Some(resolve(cwd, ctx, || "group working directory".to_string())?),
            None => None,
        };

        if self.scoped {
            ctx.push_scope();
        }
        let result = match cwd {
            Some(dir) => {
                ctx.with_working_directory(dir, |ctx| run_entries(&self.entries, ctx, processes))
            }
            None => run_entries(&self.entries, ctx, processes),
        };
        if self.scoped {
            ctx.pop_scope();
        }

        result.map_err(|e| ActionError::Nested(Box::new(e)))
    }
}

/// Runs the actions of another launch file in a fresh argument scope
#[derive(Debug, Clone)]
pub struct IncludeLaunchFile {
    /// Path to the launch file (relative to the including file's directory)
    pub file: Substitution,
    /// Arguments passed to the included file
    pub args: IndexMap<String, Substitution>,
}

impl IncludeLaunchFile {
    pub fn new(file: impl Into<Substitution>) -> Self {
        Self {
            file: file.into(),
            args: IndexMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Substitution>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    fn visit(
        &self,
        ctx: &mut LaunchContext,
        processes: &mut ProcessRegistry,
    ) -> Result<(), ActionError> {
        let file = resolve(&self.file, ctx, || "included launch file path".to_string())?;
        let mut path = PathBuf::from(file);
        if path.is_relative() {
            if let Some(dir) = ctx.launch_file_dir() {
                path = dir.join(path);
            }
        }

        let mut args = Vec::with_capacity(self.args.len());
        for (name, value) in &self.args {
            let resolved = resolve(value, ctx, || format!("include argument '{}'", name))?;
            args.push((name.clone(), resolved));
        }

        let path = path.canonicalize().unwrap_or(path);
        if ctx.active_includes().contains(&path) {
            return Err(ActionError::IncludeCycle {
                path: path.display().to_string(),
            });
        }

        let include_error = |source| ActionError::Include {
            path: path.display().to_string(),
            source,
        };
        let entries = LaunchFile::from_file(&path)
            .and_then(|launch_file| launch_file.to_entries())
            .map_err(include_error)?;

        log::info!("Including launch file: {}", path.display());
        ctx.enter_include(path.clone());
        ctx.push_scope();
        for (name, value) in args {
            ctx.set_argument(name, value);
        }
        ctx.set_launch_file_dir(path.parent().map(Path::to_path_buf));
        let result = run_entries(&entries, ctx, processes);
        ctx.pop_scope();
        ctx.exit_include();

        result.map_err(|e| ActionError::Nested(Box::new(e)))
    }
}

impl From<DeclareArgument> for Action {
    fn from(action: DeclareArgument) -> Self {
        Action::DeclareArgument(action)
    }
}

impl From<SetEnvironmentVariable> for Action {
    fn from(action: SetEnvironmentVariable) -> Self {
        Action::SetEnvironmentVariable(action)
    }
}

impl From<ExecuteProcess> for Action {
    fn from(action: ExecuteProcess) -> Self {
        Action::ExecuteProcess(action)
    }
}

impl From<Group> for Action {
    fn from(action: Group) -> Self {
        Action::Group(action)
    }
}

impl From<IncludeLaunchFile> for Action {
    fn from(action: IncludeLaunchFile) -> Self {
        Action::IncludeLaunchFile(action)
    }
}

/// Errors raised while visiting an action
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Failed to resolve {what}: {source}")]
    Resolution {
        what: String,
        #[source]
        source: SubstitutionError,
    },

    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error("Failed to load included launch file '{path}': {source}")]
    Include {
        path: String,
        #[source]
        source: LaunchFileError,
    },

    #[error("Launch file '{path}' includes itself")]
    IncludeCycle { path: String },

    #[error("{0}")]
    Nested(#[source] Box<LaunchError>),
}

impl ActionError {
    /// Whether the innermost cause is a substitution failure
    pub fn is_resolution(&self) -> bool {
        match self {
            ActionError::Resolution { .. } => true,
            ActionError::Nested(inner) => inner.is_resolution(),
            _ => false,
        }
    }

    /// Whether the innermost cause is a spawn failure
    pub fn is_spawn(&self) -> bool {
        match self {
            ActionError::Spawn(_) => true,
            ActionError::Nested(inner) => inner.is_spawn(),
            _ => false,
        }
    }
}
