//! Lazy substitution expressions and the `$(type value)` template syntax

use super::context::LaunchContext;
use super::lookup::LookupError;
use super::rewrite::RewriteError;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Regex for matching substitution patterns: $(type value) or $(type)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([\w-]+)\s*([^)]*)\)").unwrap());

/// Which location of an installed package a lookup yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Installation prefix (`$(find-pkg-prefix pkg)`)
    InstallPrefix,
    /// Share directory (`$(find-pkg-share pkg)`)
    ShareDirectory,
}

/// An expression that yields a string only when resolved against a context
///
/// Substitutions are never evaluated at construction time, so later
/// context mutations are visible to every expression that references them.
#[derive(Debug, Clone, PartialEq)]
pub enum Substitution {
    /// Fixed text
    Literal(String),
    /// Current value of a launch argument
    ConfigReference(String),
    /// Location of an installed package
    PathLookup { package: String, kind: PathKind },
    /// Children resolved in order and joined
    Concatenation(Vec<Substitution>),
    /// Environment variable (overlay first, then the host environment)
    EnvironmentVariable {
        name: String,
        default: Option<String>,
    },
    /// Directory of the launch file being visited
    ThisLaunchFileDir,
    /// Path of a rewritten parameter file
    RewrittenParams(Box<ParamRewrite>),
}

/// A parameter file rewrite whose inputs are themselves substitutions
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRewrite {
    /// Source parameter file
    pub source: Substitution,
    /// Keys to replace and their new values
    pub rewrites: IndexMap<String, Substitution>,
    /// Convert booleans and numbers to typed values
    pub convert_types: bool,
}

impl ParamRewrite {
    pub fn new(source: impl Into<Substitution>) -> Self {
        Self {
            source: source.into(),
            rewrites: IndexMap::new(),
            convert_types: false,
        }
    }

    /// Replace `key` with the resolved value of `value`
    pub fn with_rewrite(mut self, key: impl Into<String>, value: impl Into<Substitution>) -> Self {
        self.rewrites.insert(key.into(), value.into());
        self
    }

    pub fn with_convert_types(mut self, convert_types: bool) -> Self {
        self.convert_types = convert_types;
        self
    }

    /// Resolve the inputs and hand them to the context's rewriter
    pub fn resolve(&self, ctx: &LaunchContext) -> Result<String, SubstitutionError> {
        let source = self.source.resolve(ctx)?;
        let mut rewrites = IndexMap::with_capacity(self.rewrites.len());
        for (key, value) in &self.rewrites {
            rewrites.insert(key.clone(), value.resolve(ctx)?);
        }

        let path = ctx
            .rewriter()
            .rewrite(Path::new(&source), &rewrites, self.convert_types)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

impl Substitution {
    pub fn literal(value: impl Into<String>) -> Self {
        Substitution::Literal(value.into())
    }

    /// Reference to a launch argument
    pub fn arg(name: impl Into<String>) -> Self {
        Substitution::ConfigReference(name.into())
    }

    pub fn install_prefix(package: impl Into<String>) -> Self {
        Substitution::PathLookup {
            package: package.into(),
            kind: PathKind::InstallPrefix,
        }
    }

    pub fn share_directory(package: impl Into<String>) -> Self {
        Substitution::PathLookup {
            package: package.into(),
            kind: PathKind::ShareDirectory,
        }
    }

    pub fn env(name: impl Into<String>) -> Self {
        Substitution::EnvironmentVariable {
            name: name.into(),
            default: None,
        }
    }

    pub fn concat(parts: impl IntoIterator<Item = Substitution>) -> Self {
        Substitution::Concatenation(parts.into_iter().collect())
    }

    pub fn rewritten(rewrite: ParamRewrite) -> Self {
        Substitution::RewrittenParams(Box::new(rewrite))
    }

    /// Resolve the expression against the current context
    pub fn resolve(&self, ctx: &LaunchContext) -> Result<String, SubstitutionError> {
        match self {
            Substitution::Literal(value) => Ok(value.clone()),
            Substitution::ConfigReference(name) => ctx.get_argument(name).map(str::to_string),
            Substitution::PathLookup { package, kind } => {
                let path = match kind {
                    PathKind::InstallPrefix => ctx.locator().lookup_install_prefix(package)?,
                    PathKind::ShareDirectory => ctx.locator().lookup_share_directory(package)?,
                };
                Ok(path.to_string_lossy().into_owned())
            }
            Substitution::Concatenation(parts) => parts.iter().map(|p| p.resolve(ctx)).collect(),
            Substitution::EnvironmentVariable { name, default } => ctx
                .environment_variable(name)
                .or_else(|| default.clone())
                .ok_or_else(|| SubstitutionError::UndefinedEnv(name.clone())),
            Substitution::ThisLaunchFileDir => ctx
                .launch_file_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .ok_or(SubstitutionError::NoLaunchFile),
            Substitution::RewrittenParams(rewrite) => rewrite.resolve(ctx),
        }
    }

    /// Parse a template string such as `$(find-pkg-share nav)/params.yaml`
    pub fn parse(input: &str) -> Result<Self, SubstitutionError> {
        Self::parse_with(input, &IndexMap::new())
    }

    /// Parse a template string, resolving `$(params id)` against `params`
    pub fn parse_with(
        input: &str,
        params: &IndexMap<String, ParamRewrite>,
    ) -> Result<Self, SubstitutionError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Substitution::Literal(input[last..whole.start()].to_string()));
            }
            parts.push(Self::from_capture(&caps, params)?);
            last = whole.end();
        }
        if last < input.len() {
            parts.push(Substitution::Literal(input[last..].to_string()));
        }

        // Anything left that still looks like a directive is malformed
        let malformed = parts
            .iter()
            .any(|p| matches!(p, Substitution::Literal(text) if text.contains("$(")));
        if malformed {
            return Err(SubstitutionError::InvalidPattern(input.to_string()));
        }

        Ok(match parts.len() {
            0 => Substitution::Literal(String::new()),
            1 => parts.remove(0),
            _ => Substitution::Concatenation(parts),
        })
    }

    /// Build a node from a single `$(type value)` match
    fn from_capture(
        caps: &Captures,
        params: &IndexMap<String, ParamRewrite>,
    ) -> Result<Self, SubstitutionError> {
        let pattern = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let subst_type = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

        // Directives do not nest
        if value.contains("$(") {
            return Err(SubstitutionError::InvalidPattern(pattern.to_string()));
        }

        let required = |value: &str| {
            if value.is_empty() {
                Err(SubstitutionError::InvalidPattern(pattern.to_string()))
            } else {
                Ok(value.to_string())
            }
        };

        match subst_type {
            "arg" | "var" => Ok(Substitution::ConfigReference(required(value)?)),
            "env" => {
                let mut fields = value.splitn(2, char::is_whitespace);
                let name = required(fields.next().unwrap_or_default())?;
                let default = fields.next().map(|d| d.trim().to_string());
                Ok(Substitution::EnvironmentVariable { name, default })
            }
            "find-pkg-prefix" => Ok(Substitution::install_prefix(required(value)?)),
            "find-pkg-share" => Ok(Substitution::share_directory(required(value)?)),
            "dirname" => Ok(Substitution::ThisLaunchFileDir),
            "params" => {
                let id = required(value)?;
                params
                    .get(&id)
                    .cloned()
                    .map(Substitution::rewritten)
                    .ok_or(SubstitutionError::UnknownParams(id))
            }
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }
}

impl From<&str> for Substitution {
    fn from(value: &str) -> Self {
        Substitution::Literal(value.to_string())
    }
}

impl From<String> for Substitution {
    fn from(value: String) -> Self {
        Substitution::Literal(value)
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substitution::Literal(value) => write!(f, "{}", value),
            Substitution::ConfigReference(name) => write!(f, "$(arg {})", name),
            Substitution::PathLookup {
                package,
                kind: PathKind::InstallPrefix,
            } => write!(f, "$(find-pkg-prefix {})", package),
            Substitution::PathLookup {
                package,
                kind: PathKind::ShareDirectory,
            } => write!(f, "$(find-pkg-share {})", package),
            Substitution::Concatenation(parts) => {
                for part in parts {
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Substitution::EnvironmentVariable { name, default } => match default {
                Some(default) => write!(f, "$(env {} {})", name, default),
                None => write!(f, "$(env {})", name),
            },
            Substitution::ThisLaunchFileDir => write!(f, "$(dirname)"),
            Substitution::RewrittenParams(rewrite) => write!(f, "<rewritten {}>", rewrite.source),
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown parameter file: {0}")]
    UnknownParams(String),

    #[error("No launch file is being visited")]
    NoLaunchFile,

    #[error("Package lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Parameter rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
}
