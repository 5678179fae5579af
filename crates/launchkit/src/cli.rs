//! Command-line interface for launchkit

use argh::FromArgs;
use indexmap::IndexMap;

/// Declarative process launcher with ROS2-style substitutions
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch file (default: launch/default.launch.yaml)
    #[argh(positional, default = "String::from(\"launch/default.launch.yaml\")")]
    pub launch_file: String,

    /// override launch arguments (format: key:=value or key=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// print the launch plan as JSON (with --dry-run)
    #[argh(switch)]
    pub json: bool,

    /// validate launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// list declared arguments with their defaults and exit
    #[argh(switch)]
    pub show_args: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value" (or "key=value")
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once(":=")
        .or_else(|| s.split_once('='))
        .ok_or_else(|| format!("Invalid argument format '{}'. Expected 'key:=value'", s))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Missing argument name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

impl LaunchArgs {
    /// Argument overrides in command-line order; later values win
    pub fn arg_overrides(&self) -> IndexMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Filter passed to env_logger, falling back to `info`
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
