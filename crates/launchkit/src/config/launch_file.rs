//! Launch file YAML schema definitions

use super::substitution::{ParamRewrite, Substitution, SubstitutionError};
use crate::runtime::{
    Condition, DeclareArgument, ExecuteProcess, Group, IncludeLaunchFile, LaunchDescription,
    LaunchEntry, OutputPolicy, SetEnvironmentVariable,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root launch file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Rewritten parameter files, referenced as `$(params <id>)`
    #[serde(default)]
    pub params: IndexMap<String, ParamsDefinition>,

    /// Actions in execution order, each written as `- <kind>: {...}`
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub actions: Vec<ActionDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A parameter file rewritten at launch time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsDefinition {
    /// Source parameter file
    pub source: String,
    /// Keys to replace (values may use substitutions)
    #[serde(default)]
    pub rewrites: IndexMap<String, ArgValue>,
    /// Convert "true"/"42"/"0.5" into typed YAML values
    #[serde(default)]
    pub convert_types: bool,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            // Debug keeps the fraction of whole numbers ("1.0", not "1")
            ArgValue::Float(f) => format!("{:?}", f),
            ArgValue::String(s) => s.clone(),
        }
    }

    /// Infer the most specific type of a string
    pub fn infer(s: &str) -> Self {
        // Try parsing as bool first
        if s.eq_ignore_ascii_case("true") {
            return ArgValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ArgValue::Bool(false);
        }
        // Try parsing as integer
        if let Ok(i) = s.parse::<i64>() {
            return ArgValue::Int(i);
        }
        // Try parsing as float
        if let Ok(f) = s.parse::<f64>() {
            return ArgValue::Float(f);
        }
        // Default to string
        ArgValue::String(s.to_string())
    }
}

/// `if` / `unless` guard shared by every action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionDefinition {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<String>,
}

/// One entry of the `actions` list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDefinition {
    Arg(ArgDefinition),
    SetEnv(SetEnvDefinition),
    Execute(ExecuteDefinition),
    Group(GroupDefinition),
    Include(IncludeDefinition),
}

/// Argument declaration with default value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    pub name: String,
    /// Default value for the argument
    pub default: ArgValue,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub when: ConditionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetEnvDefinition {
    pub name: String,
    pub value: ArgValue,
    #[serde(flatten)]
    pub when: ConditionDefinition,
}

/// Process to spawn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteDefinition {
    /// Process name (defaults to the executable's file name)
    #[serde(default)]
    pub name: Option<String>,
    /// Executable followed by its arguments
    pub cmd: Vec<String>,
    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<String>,
    /// Environment variables specific to this process
    #[serde(default)]
    pub env: IndexMap<String, ArgValue>,
    /// `screen` (inherit) or `log` (capture)
    #[serde(default)]
    pub output: OutputPolicy,
    #[serde(flatten)]
    pub when: ConditionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Restore arguments and environment after the group
    #[serde(default = "default_scoped")]
    pub scoped: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(flatten)]
    pub when: ConditionDefinition,
}

fn default_scoped() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeDefinition {
    /// Launch file to include, relative to this file
    pub file: String,
    /// Arguments passed to the included file
    #[serde(default)]
    pub args: IndexMap<String, ArgValue>,
    #[serde(flatten)]
    pub when: ConditionDefinition,
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file configuration
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        self.to_entries().map(|_| ())
    }

    /// Build a launch description from this file
    pub fn to_description(&self) -> Result<LaunchDescription, LaunchFileError> {
        Ok(LaunchDescription::from_entries(self.to_entries()?))
    }

    /// Compile every action, parsing all substitution templates
    pub fn to_entries(&self) -> Result<Vec<LaunchEntry>, LaunchFileError> {
        let mut params = IndexMap::new();
        for (id, def) in &self.params {
            let location = format!("params.{}", id);
            let mut rewrite = ParamRewrite::new(template(&def.source, &location)?)
                .with_convert_types(def.convert_types);
            for (key, value) in &def.rewrites {
                let value = template(&value.as_str(), &format!("{}.rewrites.{}", location, key))?;
                rewrite = rewrite.with_rewrite(key.clone(), value);
            }
            params.insert(id.clone(), rewrite);
        }

        let compiler = Compiler { params: &params };
        compiler.compile_all(&self.actions, "actions")
    }
}

/// Parse a template, attaching its location to errors
fn template(input: &str, location: &str) -> Result<Substitution, LaunchFileError> {
    Substitution::parse(input).map_err(|source| LaunchFileError::Template {
        location: location.to_string(),
        source,
    })
}

/// Turns action definitions into launch entries
struct Compiler<'a> {
    params: &'a IndexMap<String, ParamRewrite>,
}

impl Compiler<'_> {
    fn parse(&self, input: &str, location: &str) -> Result<Substitution, LaunchFileError> {
        Substitution::parse_with(input, self.params).map_err(|source| LaunchFileError::Template {
            location: location.to_string(),
            source,
        })
    }

    fn compile_all(
        &self,
        actions: &[ActionDefinition],
        location: &str,
    ) -> Result<Vec<LaunchEntry>, LaunchFileError> {
        actions
            .iter()
            .enumerate()
            .map(|(i, action)| self.compile(action, &format!("{}[{}]", location, i)))
            .collect()
    }

    fn compile(
        &self,
        action: &ActionDefinition,
        location: &str,
    ) -> Result<LaunchEntry, LaunchFileError> {
        match action {
            ActionDefinition::Arg(def) => {
                if def.name.is_empty() {
                    return Err(LaunchFileError::Validation(format!(
                        "{}: argument name must not be empty",
                        location
                    )));
                }
                let default = self.parse(&def.default.as_str(), location)?;
                let mut declare = DeclareArgument::new(def.name.clone(), default);
                declare.description = def.description.clone();
                self.guarded(declare, &def.when, location)
            }
            ActionDefinition::SetEnv(def) => {
                let value = self.parse(&def.value.as_str(), location)?;
                self.guarded(
                    SetEnvironmentVariable::new(def.name.clone(), value),
                    &def.when,
                    location,
                )
            }
            ActionDefinition::Execute(def) => {
                if def.cmd.is_empty() {
                    return Err(LaunchFileError::Validation(format!(
                        "{}: 'cmd' must not be empty",
                        location
                    )));
                }
                let cmd = def
                    .cmd
                    .iter()
                    .map(|part| self.parse(part, location))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut execute = ExecuteProcess::new(cmd).with_output(def.output);
                execute.name = def.name.clone();
                if let Some(cwd) = &def.cwd {
                    execute = execute.with_cwd(self.parse(cwd, location)?);
                }
                for (key, value) in &def.env {
                    let value = self.parse(&value.as_str(), location)?;
                    execute = execute.with_env(key.clone(), value);
                }
                self.guarded(execute, &def.when, location)
            }
            ActionDefinition::Group(def) => {
                let entries = self.compile_all(&def.actions, &format!("{}.actions", location))?;
                let mut group = Group::new(entries).with_scoped(def.scoped);
                if let Some(cwd) = &def.cwd {
                    group = group.with_cwd(self.parse(cwd, location)?);
                }
                self.guarded(group, &def.when, location)
            }
            ActionDefinition::Include(def) => {
                let mut include = IncludeLaunchFile::new(self.parse(&def.file, location)?);
                for (name, value) in &def.args {
                    let value = self.parse(&value.as_str(), location)?;
                    include = include.with_arg(name.clone(), value);
                }
                self.guarded(include, &def.when, location)
            }
        }
    }

    fn guarded(
        &self,
        action: impl Into<crate::runtime::Action>,
        when: &ConditionDefinition,
        location: &str,
    ) -> Result<LaunchEntry, LaunchFileError> {
        let condition = match (&when.if_true, &when.unless) {
            (Some(_), Some(_)) => {
                return Err(LaunchFileError::Validation(format!(
                    "{}: cannot specify both 'if' and 'unless'",
                    location
                )));
            }
            (Some(expr), None) => Some(Condition::If(self.parse(expr, location)?)),
            (None, Some(expr)) => Some(Condition::Unless(self.parse(expr, location)?)),
            (None, None) => None,
        };

        Ok(match condition {
            Some(condition) => LaunchEntry::conditional(action, condition),
            None => LaunchEntry::new(action),
        })
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid substitution in {location}: {source}")]
    Template {
        location: String,
        #[source]
        source: SubstitutionError,
    },
}
