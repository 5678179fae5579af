//! Parameter file rewriting

use super::launch_file::ArgValue;
use indexmap::IndexMap;
use serde_yaml::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Produces a patched copy of a parameter file
pub trait ParamRewriter: Send + Sync {
    /// Rewrite `source` with `rewrites` applied and return the path of the result
    fn rewrite(
        &self,
        source: &Path,
        rewrites: &IndexMap<String, String>,
        convert_types: bool,
    ) -> Result<PathBuf, RewriteError>;
}

/// Rewriter for YAML parameter files
///
/// Every mapping key named in the rewrites is replaced, at any depth. The
/// output is written to a temporary file that outlives the rewriter. In
/// dry-run mode the source is still loaded and patched, but nothing is
/// written and a placeholder path is returned.
#[derive(Debug, Clone, Default)]
pub struct YamlRewriter {
    /// Directory for rewritten files (system temp dir when unset)
    output_dir: Option<PathBuf>,
    dry_run: bool,
}

impl YamlRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write rewritten files into `dir`
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Validate rewrites without writing any file
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl ParamRewriter for YamlRewriter {
    fn rewrite(
        &self,
        source: &Path,
        rewrites: &IndexMap<String, String>,
        convert_types: bool,
    ) -> Result<PathBuf, RewriteError> {
        let io_error = |path: &Path, e: std::io::Error| RewriteError::Io {
            path: path.display().to_string(),
            source: e,
        };

        let content = std::fs::read_to_string(source).map_err(|e| io_error(source, e))?;
        let mut document: Value = serde_yaml::from_str(&content)?;
        apply_rewrites(&mut document, rewrites, convert_types);
        let yaml = serde_yaml::to_string(&document)?;

        if self.dry_run {
            log::debug!("Would rewrite {} ({} keys)", source.display(), rewrites.len());
            return Ok(PathBuf::from(format!("<rewritten {}>", source.display())));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("launchkit_params_").suffix(".yaml");
        let mut file = match &self.output_dir {
            Some(dir) => builder.tempfile_in(dir).map_err(|e| io_error(dir, e))?,
            None => builder
                .tempfile()
                .map_err(|e| io_error(&std::env::temp_dir(), e))?,
        };
        file.write_all(yaml.as_bytes())
            .map_err(|e| io_error(file.path(), e))?;

        let (_, path) = file.keep().map_err(|e| RewriteError::Io {
            path: e.file.path().display().to_string(),
            source: e.error,
        })?;

        log::debug!(
            "Rewrote {} ({} keys) -> {}",
            source.display(),
            rewrites.len(),
            path.display()
        );
        Ok(path)
    }
}

fn apply_rewrites(value: &mut Value, rewrites: &IndexMap<String, String>, convert_types: bool) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                match key.as_str().and_then(|k| rewrites.get(k)) {
                    Some(replacement) => *child = to_yaml(replacement, convert_types),
                    None => apply_rewrites(child, rewrites, convert_types),
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                apply_rewrites(item, rewrites, convert_types);
            }
        }
        Value::Tagged(tagged) => apply_rewrites(&mut tagged.value, rewrites, convert_types),
        _ => {}
    }
}

fn to_yaml(value: &str, convert_types: bool) -> Value {
    if !convert_types {
        return Value::String(value.to_string());
    }
    match ArgValue::infer(value) {
        ArgValue::Bool(b) => Value::Bool(b),
        ArgValue::Int(i) => Value::Number(i.into()),
        ArgValue::Float(f) => Value::Number(f.into()),
        ArgValue::String(s) => Value::String(s),
    }
}

/// Errors that can occur while rewriting a parameter file
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid parameter file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = r#"
bt_navigator:
  ros__parameters:
    autostart: false
    bt_xml_filename: "old.xml"
    plugins:
      - name: first
        max_speed: "0.5"
lifecycle_manager:
  ros__parameters:
    autostart: false
"#;

    fn rewrites() -> IndexMap<String, String> {
        let mut rewrites = IndexMap::new();
        rewrites.insert("autostart".to_string(), "true".to_string());
        rewrites.insert("bt_xml_filename".to_string(), "/opt/trees/default.xml".to_string());
        rewrites.insert("max_speed".to_string(), "0.26".to_string());
        rewrites
    }

    fn rewrite_params(convert_types: bool) -> Value {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("params.yaml");
        std::fs::write(&source, PARAMS).unwrap();

        let rewriter = YamlRewriter::new().with_output_dir(dir.path());
        let output = rewriter.rewrite(&source, &rewrites(), convert_types).unwrap();
        assert_ne!(output, source);
        assert!(output.starts_with(dir.path()));

        let content = std::fs::read_to_string(&output).unwrap();
        serde_yaml::from_str(&content).unwrap()
    }

    #[test]
    fn test_rewrite_with_type_conversion() {
        let doc = rewrite_params(true);
        let params = &doc["bt_navigator"]["ros__parameters"];

        assert_eq!(params["autostart"], Value::Bool(true));
        assert_eq!(
            params["bt_xml_filename"],
            Value::String("/opt/trees/default.xml".to_string())
        );
        assert_eq!(params["plugins"][0]["max_speed"].as_f64(), Some(0.26));
        assert_eq!(params["plugins"][0]["name"], Value::String("first".to_string()));
        assert_eq!(
            doc["lifecycle_manager"]["ros__parameters"]["autostart"],
            Value::Bool(true)
        );
    }

    #[test]
    fn test_rewrite_without_type_conversion() {
        let doc = rewrite_params(false);
        let params = &doc["bt_navigator"]["ros__parameters"];

        assert_eq!(params["autostart"], Value::String("true".to_string()));
        assert_eq!(
            params["plugins"][0]["max_speed"],
            Value::String("0.26".to_string())
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("params.yaml");
        std::fs::write(&source, PARAMS).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let rewriter = YamlRewriter::new()
            .with_output_dir(&out_dir)
            .with_dry_run(true);
        let output = rewriter.rewrite(&source, &rewrites(), true).unwrap();

        assert_eq!(
            output,
            PathBuf::from(format!("<rewritten {}>", source.display()))
        );
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);

        // The source is still checked
        let missing = rewriter.rewrite(&dir.path().join("missing.yaml"), &rewrites(), true);
        assert!(matches!(missing, Err(RewriteError::Io { .. })));
    }

    #[test]
    fn test_rewrite_missing_source() {
        let rewriter = YamlRewriter::new();
        let result = rewriter.rewrite(Path::new("/nonexistent/params.yaml"), &rewrites(), true);
        assert!(matches!(result, Err(RewriteError::Io { .. })));
    }
}
