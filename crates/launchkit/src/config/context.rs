//! Launch context threaded through every resolution and action visit

use super::lookup::{AmentIndexLocator, PackageLocator};
use super::rewrite::{ParamRewriter, YamlRewriter};
use super::substitution::SubstitutionError;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A declared launch argument, as reported by `--show-args` and plans
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentInfo {
    /// Default expression in template form
    pub default: String,
    /// Human readable description
    pub description: Option<String>,
}

/// State restored by `pop_scope`
#[derive(Debug, Clone)]
struct Scope {
    args: IndexMap<String, String>,
    env: IndexMap<String, String>,
    working_dir: Option<PathBuf>,
    launch_file_dir: Option<PathBuf>,
}

/// Mutable resolution environment for one launch run
///
/// Environment variables set here form an overlay that is applied to
/// spawned processes only. The orchestrator's own environment is never
/// modified.
#[derive(Clone)]
pub struct LaunchContext {
    args: IndexMap<String, String>,
    env: IndexMap<String, String>,
    working_dir: Option<PathBuf>,
    launch_file_dir: Option<PathBuf>,
    declared: IndexMap<String, ArgumentInfo>,
    scopes: Vec<Scope>,
    includes: Vec<PathBuf>,
    locator: Arc<dyn PackageLocator>,
    rewriter: Arc<dyn ParamRewriter>,
}

impl LaunchContext {
    /// Create a context using the ament index and the YAML rewriter
    pub fn new() -> Self {
        Self {
            args: IndexMap::new(),
            env: IndexMap::new(),
            working_dir: None,
            launch_file_dir: None,
            declared: IndexMap::new(),
            scopes: Vec::new(),
            includes: Vec::new(),
            locator: Arc::new(AmentIndexLocator::from_env()),
            rewriter: Arc::new(YamlRewriter::new()),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add multiple arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = (String, String)>) -> Self {
        self.args.extend(args);
        self
    }

    /// Add an environment variable to the overlay
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn PackageLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn ParamRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Set the directory `$(dirname)` resolves to
    pub fn with_launch_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.launch_file_dir = Some(dir.into());
        self
    }

    /// Set an argument, overwriting any previous value
    pub fn set_argument(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.args.insert(name.into(), value.into());
    }

    /// Current value of an argument
    pub fn get_argument(&self, name: &str) -> Result<&str, SubstitutionError> {
        self.args
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))
    }

    pub fn has_argument(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn arguments(&self) -> &IndexMap<String, String> {
        &self.args
    }

    /// Set a variable in the overlay applied to subsequently spawned processes
    pub fn set_environment_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    /// Look up a variable in the overlay, then in the host environment
    pub fn environment_variable(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// The environment overlay
    pub fn environment(&self) -> &IndexMap<String, String> {
        &self.env
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Run `f` with `path` as the working directory, restoring the previous one after
    pub fn with_working_directory<T>(
        &mut self,
        path: impl Into<PathBuf>,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let previous = self.working_dir.replace(path.into());
        let result = f(self);
        self.working_dir = previous;
        result
    }

    pub fn launch_file_dir(&self) -> Option<&Path> {
        self.launch_file_dir.as_deref()
    }

    pub fn set_launch_file_dir(&mut self, dir: Option<PathBuf>) {
        self.launch_file_dir = dir;
    }

    /// Snapshot arguments, environment and directories
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope {
            args: self.args.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
            launch_file_dir: self.launch_file_dir.clone(),
        });
    }

    /// Restore the most recent snapshot
    pub fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.args = scope.args;
            self.env = scope.env;
            self.working_dir = scope.working_dir;
            self.launch_file_dir = scope.launch_file_dir;
        } else {
            log::warn!("pop_scope called without a matching push_scope");
        }
    }

    /// Mark `path` as being included; false if it is already being included
    pub fn enter_include(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.includes.contains(&path) {
            return false;
        }
        self.includes.push(path);
        true
    }

    pub fn exit_include(&mut self) {
        self.includes.pop();
    }

    /// Launch files currently being included, outermost first
    pub fn active_includes(&self) -> &[PathBuf] {
        &self.includes
    }

    /// Record an argument declaration (first declaration wins)
    pub fn declare(&mut self, name: impl Into<String>, info: ArgumentInfo) {
        self.declared.entry(name.into()).or_insert(info);
    }

    pub fn declared_arguments(&self) -> &IndexMap<String, ArgumentInfo> {
        &self.declared
    }

    pub fn locator(&self) -> &dyn PackageLocator {
        self.locator.as_ref()
    }

    pub fn rewriter(&self) -> &dyn ParamRewriter {
        self.rewriter.as_ref()
    }
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LaunchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchContext")
            .field("args", &self.args)
            .field("env", &self.env)
            .field("working_dir", &self.working_dir)
            .field("launch_file_dir", &self.launch_file_dir)
            .field("scopes", &self.scopes.len())
            .field("includes", &self.includes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_stack() {
        let mut ctx = LaunchContext::new();
        assert!(ctx.enter_include("/opt/launch/a.yaml"));
        assert!(ctx.enter_include("/opt/launch/b.yaml"));
        assert!(!ctx.enter_include("/opt/launch/a.yaml"));
        assert_eq!(ctx.active_includes().len(), 2);

        ctx.exit_include();
        ctx.exit_include();
        assert!(ctx.enter_include("/opt/launch/a.yaml"));
    }

    #[test]
    fn test_set_argument_overwrites() {
        let mut ctx = LaunchContext::new();
        ctx.set_argument("bt", "first.xml");
        ctx.set_argument("bt", "second.xml");

        assert_eq!(ctx.get_argument("bt").unwrap(), "second.xml");
        assert_eq!(ctx.arguments().len(), 1);
    }

    #[test]
    fn test_get_missing_argument() {
        let ctx = LaunchContext::new();
        assert!(matches!(
            ctx.get_argument("missing"),
            Err(SubstitutionError::UndefinedArg(_))
        ));
    }

    #[test]
    fn test_environment_overlay_is_local() {
        let mut ctx = LaunchContext::new();
        ctx.set_environment_variable("LAUNCHKIT_CONTEXT_ONLY", "1");

        assert_eq!(ctx.environment()["LAUNCHKIT_CONTEXT_ONLY"], "1");
        assert_eq!(ctx.environment_variable("LAUNCHKIT_CONTEXT_ONLY").as_deref(), Some("1"));
        assert!(std::env::var("LAUNCHKIT_CONTEXT_ONLY").is_err());
    }

    #[test]
    fn test_with_working_directory_restores() {
        let mut ctx = LaunchContext::new();
        assert!(ctx.working_directory().is_none());

        let inner = ctx.with_working_directory("/srv/launch", |ctx| {
            ctx.working_directory().map(Path::to_path_buf)
        });

        assert_eq!(inner, Some(PathBuf::from("/srv/launch")));
        assert!(ctx.working_directory().is_none());
    }

    #[test]
    fn test_scope_restores_state() {
        let mut ctx = LaunchContext::new().with_arg("map", "office");
        ctx.push_scope();
        ctx.set_argument("map", "warehouse");
        ctx.set_argument("robot", "tb3");
        ctx.set_environment_variable("ROS_DOMAIN_ID", "7");
        ctx.set_launch_file_dir(Some(PathBuf::from("/opt/other")));
        ctx.pop_scope();

        assert_eq!(ctx.get_argument("map").unwrap(), "office");
        assert!(!ctx.has_argument("robot"));
        assert!(ctx.environment().is_empty());
        assert!(ctx.launch_file_dir().is_none());
    }

    #[test]
    fn test_declare_keeps_first() {
        let mut ctx = LaunchContext::new();
        ctx.declare(
            "autostart",
            ArgumentInfo {
                default: "true".to_string(),
                description: Some("Automatically start".to_string()),
            },
        );
        ctx.declare(
            "autostart",
            ArgumentInfo {
                default: "false".to_string(),
                description: None,
            },
        );

        assert_eq!(ctx.declared_arguments()["autostart"].default, "true");
    }
}
