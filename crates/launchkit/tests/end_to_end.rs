//! End-to-end launch runs: from a description (or a YAML file) to spawned processes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use launchkit::config::ParamRewriter;
use launchkit::{
    DeclareArgument, ExecuteProcess, ExecutorConfig, LaunchContext, LaunchDescription, LaunchFile,
    LaunchService, ParamRewrite, ProcessRegistry, RewriteError, RunState, StaticLocator,
    Substitution, YamlRewriter,
};
use tokio::sync::watch;

/// Rewriter that records its inputs and returns a fixed path
#[derive(Default)]
struct RecordingRewriter {
    calls: Mutex<Vec<(PathBuf, IndexMap<String, String>, bool)>>,
}

impl ParamRewriter for RecordingRewriter {
    fn rewrite(
        &self,
        source: &Path,
        rewrites: &IndexMap<String, String>,
        convert_types: bool,
    ) -> Result<PathBuf, RewriteError> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), rewrites.clone(), convert_types));
        Ok(PathBuf::from("/tmp/launch_params_rewritten.yaml"))
    }
}

fn controller_description() -> LaunchDescription {
    let params = ParamRewrite::new(Substitution::arg("params"))
        .with_rewrite("autostart", Substitution::arg("autostart"))
        .with_rewrite("bt_file", Substitution::arg("bt"))
        .with_convert_types(true);

    let mut description = LaunchDescription::new();
    description.add_action(DeclareArgument::new("autostart", "true"));
    description.add_action(ExecuteProcess::new([
        Substitution::concat([
            Substitution::install_prefix("controller"),
            Substitution::literal("/bin/controller"),
        ]),
        Substitution::concat([
            Substitution::literal("__params:="),
            Substitution::rewritten(params),
        ]),
    ]));
    description
}

#[test]
fn test_controller_launch() {
    let rewriter = Arc::new(RecordingRewriter::default());
    let mut ctx = LaunchContext::new()
        .with_arg("params", "/etc/nav/params.yaml")
        .with_arg("bt", "/opt/trees/default.xml")
        .with_locator(Arc::new(
            StaticLocator::new().with_package("controller", "/opt/ros/controller"),
        ))
        .with_rewriter(rewriter.clone());

    let mut description = controller_description();
    let mut processes = ProcessRegistry::dry_run();
    description.run(&mut ctx, &mut processes).unwrap();

    assert_eq!(description.state(), RunState::Completed);
    assert_eq!(ctx.get_argument("autostart").unwrap(), "true");

    let planned = processes.planned();
    assert_eq!(planned.len(), 1);
    assert_eq!(
        planned[0].cmd,
        vec![
            "/opt/ros/controller/bin/controller".to_string(),
            "__params:=/tmp/launch_params_rewritten.yaml".to_string(),
        ]
    );

    let calls = rewriter.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (source, rewrites, convert_types) = &calls[0];
    assert_eq!(source, Path::new("/etc/nav/params.yaml"));
    assert_eq!(rewrites["autostart"], "true");
    assert_eq!(rewrites["bt_file"], "/opt/trees/default.xml");
    assert!(*convert_types);
}

#[test]
fn test_missing_package_fails_run() {
    let mut ctx = LaunchContext::new()
        .with_arg("params", "/etc/nav/params.yaml")
        .with_arg("bt", "/opt/trees/default.xml")
        .with_locator(Arc::new(StaticLocator::new()))
        .with_rewriter(Arc::new(RecordingRewriter::default()));

    let mut description = controller_description();
    let mut processes = ProcessRegistry::dry_run();
    let err = description.run(&mut ctx, &mut processes).unwrap_err();

    assert!(err.is_resolution());
    assert_eq!(err.index(), Some(1));
    assert_eq!(description.state(), RunState::Failed);
    assert!(processes.planned().is_empty());
}

#[test]
fn test_plan_from_yaml() {
    let yaml = r#"
params:
  nav:
    source: "/etc/nav/params.yaml"
    rewrites:
      use_sim_time: "$(arg use_sim)"
actions:
  - arg:
      name: use_sim
      default: false
  - set_env:
      name: ROS_DOMAIN_ID
      value: 7
  - group:
      actions:
        - set_env:
            name: SCOPED
            value: "yes"
        - execute:
            name: planner
            cmd: ["$(find-pkg-prefix planner)/bin/planner", "__params:=$(params nav)"]
  - execute:
      name: simulator
      cmd: ["$(find-pkg-prefix gazebo)/bin/gzserver"]
      if: "$(arg use_sim)"
"#;
    let mut description = LaunchFile::from_yaml(yaml)
        .unwrap()
        .to_description()
        .unwrap();

    let ctx = LaunchContext::new()
        .with_arg("use_sim", "true")
        .with_locator(Arc::new(
            StaticLocator::new()
                .with_package("planner", "/opt/planner")
                .with_package("gazebo", "/opt/gazebo"),
        ))
        .with_rewriter(Arc::new(RecordingRewriter::default()));

    let plan = LaunchService::plan(ctx, &mut description).unwrap();

    assert_eq!(plan.args["use_sim"], "true");
    assert_eq!(plan.env.get("ROS_DOMAIN_ID").map(String::as_str), Some("7"));
    assert!(!plan.env.contains_key("SCOPED"));

    let names: Vec<_> = plan.processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["planner", "simulator"]);
    assert_eq!(plan.processes[0].env["SCOPED"], "yes");
    assert_eq!(plan.processes[0].env["ROS_DOMAIN_ID"], "7");
    assert_eq!(
        plan.processes[0].cmd[1],
        "__params:=/tmp/launch_params_rewritten.yaml"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_launch_spawns_with_rewritten_params() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("argv.txt");

    std::fs::write(
        dir.path().join("record.sh"),
        "#!/bin/sh\nout=\"$1\"\nshift\nfor a in \"$@\"; do echo \"$a\" >> \"$out\"; done\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("params.yaml"),
        "controller:\n  ros__parameters:\n    autostart: true\n    rate: 10\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("bringup.launch.yaml"),
        r#"
params:
  controller:
    source: "$(dirname)/params.yaml"
    rewrites:
      autostart: "$(arg autostart)"
    convert_types: true
actions:
  - arg:
      name: autostart
      default: true
  - arg:
      name: out
      default: "$(dirname)/argv.txt"
  - execute:
      name: recorder
      cmd: ["sh", "$(dirname)/record.sh", "$(arg out)", "__params:=$(params controller)"]
      output: log
"#,
    )
    .unwrap();

    let launch_path = dir.path().join("bringup.launch.yaml");
    let mut description = LaunchFile::from_file(&launch_path)
        .unwrap()
        .to_description()
        .unwrap();

    let ctx = LaunchContext::new()
        .with_arg("autostart", "false")
        .with_launch_file_dir(dir.path())
        .with_rewriter(Arc::new(YamlRewriter::new().with_output_dir(dir.path())));

    let config = ExecutorConfig {
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let mut service = LaunchService::new(ctx, config);
    service.launch(&mut description).unwrap();
    assert_eq!(description.state(), RunState::Completed);

    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::time::timeout(Duration::from_secs(10), service.wait(shutdown_rx))
        .await
        .unwrap();
    service.shutdown().await;

    let argv = std::fs::read_to_string(&out).unwrap();
    let rewritten = argv
        .trim()
        .strip_prefix("__params:=")
        .map(PathBuf::from)
        .unwrap();
    assert!(rewritten.starts_with(dir.path()));

    let params: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(&rewritten).unwrap()).unwrap();
    assert_eq!(
        params["controller"]["ros__parameters"]["autostart"],
        serde_yaml::Value::Bool(false)
    );
    assert_eq!(
        params["controller"]["ros__parameters"]["rate"],
        serde_yaml::Value::Number(10.into())
    );
}
