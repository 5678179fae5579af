//! launchkit
//!
//! A declarative process launcher with ROS2-style substitutions.
//!
//! # Overview
//!
//! A launch description is an ordered list of actions, each optionally
//! guarded by an `if`/`unless` condition. Actions are executed strictly in
//! order; values are written as lazy substitutions that are resolved against
//! the [`LaunchContext`] at the moment the action runs.
//!
//! - Declare arguments with defaults that callers can override
//! - Set environment variables inherited by later processes
//! - Spawn processes and shut them down in reverse order
//! - Rewrite parameter files before handing them to a process
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//!
//! params:
//!   controller:
//!     source: "$(arg params_file)"
//!     rewrites:
//!       autostart: "$(arg autostart)"
//!     convert_types: true
//!
//! actions:
//!   - arg:
//!       name: autostart
//!       default: true
//!   - arg:
//!       name: params_file
//!       default: "$(find-pkg-share bringup)/params/nav2_params.yaml"
//!   - execute:
//!       cmd:
//!         - "$(find-pkg-prefix dwb_controller)/lib/dwb_controller/dwb_controller"
//!         - "__params:=$(params controller)"
//!       if: "$(arg autostart)"
//! ```

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{
    AmentIndexLocator, ArgumentInfo, LaunchContext, LaunchFile, LaunchFileError, LookupError,
    PackageLocator, ParamRewrite, ParamRewriter, PathKind, RewriteError, StaticLocator,
    Substitution, SubstitutionError, YamlRewriter,
};
pub use runtime::{
    Action, ActionError, ActionKind, Condition, DeclareArgument, ExecuteProcess, ExecutorConfig,
    Group, IncludeLaunchFile, LaunchDescription, LaunchEntry, LaunchError, LaunchPlan,
    LaunchService, OutputPolicy, ProcessConfig, ProcessError, ProcessEvent, ProcessHandle,
    ProcessRegistry, ProcessStatus, RunState, SetEnvironmentVariable,
};
