//! Launch service - runs a description and manages the spawned processes

use crate::config::LaunchContext;
use crate::runtime::description::{LaunchDescription, LaunchError};
use crate::runtime::process::{ProcessConfig, ProcessEvent, ProcessStatus};
use crate::runtime::registry::ProcessRegistry;
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Launch service configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Grace period between SIGTERM and SIGKILL on shutdown
    pub shutdown_timeout: Duration,
    /// How often `wait` polls for exited processes
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Owns the context and processes of one launch run
pub struct LaunchService {
    /// Configuration
    config: ExecutorConfig,
    /// Resolution context
    context: LaunchContext,
    /// Arguments supplied before the run
    supplied: Vec<String>,
    /// Spawned processes
    processes: ProcessRegistry,
    /// Event channel
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

/// Launch plan for dry-run mode
#[derive(Debug, Serialize)]
pub struct LaunchPlan {
    /// Resolved arguments
    pub args: IndexMap<String, String>,
    /// Environment overlay at the end of the run
    pub env: IndexMap<String, String>,
    /// Processes in launch order
    pub processes: Vec<ProcessConfig>,
}

impl LaunchService {
    /// Create a service around a pre-populated context
    pub fn new(context: LaunchContext, config: ExecutorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let supplied = context.arguments().keys().cloned().collect();

        Self {
            config,
            context,
            supplied,
            processes: ProcessRegistry::new(event_tx),
            event_rx,
        }
    }

    pub fn context(&self) -> &LaunchContext {
        &self.context
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Run the description, spawning its processes
    ///
    /// Must be called from within a tokio runtime. On failure, processes that
    /// were already started keep running until `shutdown` is called.
    pub fn launch(&mut self, description: &mut LaunchDescription) -> Result<(), LaunchError> {
        description.run(&mut self.context, &mut self.processes)?;
        self.warn_undeclared();
        log::info!("Launched {} processes", self.processes.len());
        Ok(())
    }

    /// Run the description without spawning and return what would be launched
    pub fn plan(
        mut context: LaunchContext,
        description: &mut LaunchDescription,
    ) -> Result<LaunchPlan, LaunchError> {
        let mut processes = ProcessRegistry::dry_run();
        description.run(&mut context, &mut processes)?;

        Ok(LaunchPlan {
            args: context.arguments().clone(),
            env: context.environment().clone(),
            processes: processes.planned().to_vec(),
        })
    }

    /// Supplied arguments that no action declared are most likely typos
    fn warn_undeclared(&self) {
        let declared = self.context.declared_arguments();
        for name in &self.supplied {
            if !declared.contains_key(name) {
                log::warn!("Argument '{}' was supplied but never declared", name);
            }
        }
    }

    /// Forward process events until shutdown is requested or every process has exited
    pub async fn wait(&mut self, mut shutdown_rx: watch::Receiver<()>) {
        // One timer for the whole loop so chatty output cannot postpone polling
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Check for shutdown signal
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    break;
                }

                // Process events
                event = self.event_rx.recv() => {
                    if let Some((name, event)) = event {
                        log_event(&name, event);
                    }
                }

                // Check process status periodically
                _ = poll.tick() => {
                    if !self.processes.poll() {
                        log::info!("All processes have stopped");
                        break;
                    }
                }
            }
        }

        // Flush what is already queued
        while let Ok((name, event)) = self.event_rx.try_recv() {
            log_event(&name, event);
        }
    }

    /// Stop all processes in reverse launch order
    pub async fn shutdown(&mut self) {
        log::info!("Shutting down all processes...");
        self.processes.shutdown(self.config.shutdown_timeout).await;
        log::info!("All processes shut down");
    }

    /// Get process status summary
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes.status()
    }
}

fn log_event(name: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            if is_stderr {
                log::warn!("[{}] {}", name, line);
            } else {
                log::info!("[{}] {}", name, line);
            }
        }
        ProcessEvent::Exited { code: Some(0) } => {
            log::info!("[{}] Process exited cleanly", name);
        }
        ProcessEvent::Exited { code } => {
            log::warn!("[{}] Process exited with code: {:?}", name, code);
        }
        ProcessEvent::Failed { error } => {
            log::error!("[{}] Process failed: {}", name, error);
        }
        ProcessEvent::Started { pid } => {
            log::info!("[{}] Process started with PID: {}", name, pid);
        }
    }
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.args.is_empty() {
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.args {
                writeln!(f, "  {}: {}", key, value)?;
            }
            writeln!(f)?;
        }

        if !self.env.is_empty() {
            writeln!(f, "Environment:")?;
            for (key, value) in &self.env {
                writeln!(f, "  {}={}", key, value)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Processes (in launch order):")?;
        for (i, process) in self.processes.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, process.name)?;
            writeln!(f, "     Command: {}", process.cmd.join(" "))?;

            if let Some(dir) = &process.working_dir {
                writeln!(f, "     Working directory: {}", dir.display())?;
            }
            writeln!(f, "     Output: {:?}", process.output)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Substitution;
    use crate::runtime::action::{DeclareArgument, ExecuteProcess, SetEnvironmentVariable};

    fn description() -> LaunchDescription {
        let mut description = LaunchDescription::new();
        description.add_action(DeclareArgument::new("rate", "10"));
        description.add_action(SetEnvironmentVariable::new("LINE_BUFFERED", "1"));
        description.add_action(
            ExecuteProcess::new([
                Substitution::literal("/opt/bin/driver"),
                Substitution::concat([Substitution::literal("--rate="), Substitution::arg("rate")]),
            ])
            .with_cwd("/tmp"),
        );
        description
    }

    #[test]
    fn test_plan() {
        let ctx = LaunchContext::new().with_arg("rate", "50");
        let mut description = description();
        let plan = LaunchService::plan(ctx, &mut description).unwrap();

        assert_eq!(plan.args["rate"], "50");
        assert_eq!(plan.env["LINE_BUFFERED"], "1");
        assert_eq!(plan.processes.len(), 1);
        assert_eq!(plan.processes[0].cmd, vec!["/opt/bin/driver", "--rate=50"]);
        assert_eq!(plan.processes[0].env["LINE_BUFFERED"], "1");

        let text = plan.to_string();
        assert!(text.contains("1. driver"));
        assert!(text.contains("Command: /opt/bin/driver --rate=50"));
        assert!(text.contains("Working directory: /tmp"));

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["processes"][0]["output"], "screen");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_and_shutdown() {
        let mut description = LaunchDescription::new();
        description.add_action(ExecuteProcess::new([
            Substitution::literal("sleep"),
            Substitution::literal("30"),
        ]));

        let config = ExecutorConfig {
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut service = LaunchService::new(LaunchContext::new(), config);
        service.launch(&mut description).unwrap();

        assert_eq!(service.status(), vec![("sleep", ProcessStatus::Running)]);

        service.shutdown().await;
        assert!(service.status()[0].1.is_stopped());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure_leaves_started_processes() {
        let mut description = LaunchDescription::new();
        description.add_action(ExecuteProcess::new([
            Substitution::literal("sleep"),
            Substitution::literal("30"),
        ]));
        description.add_action(ExecuteProcess::new([Substitution::literal(
            "/nonexistent/bin/missing",
        )]));
        description.add_action(SetEnvironmentVariable::new("AFTER", "1"));

        let mut service = LaunchService::new(LaunchContext::new(), ExecutorConfig::default());
        let err = service.launch(&mut description).unwrap_err();

        assert!(err.is_spawn());
        assert_eq!(err.index(), Some(1));
        assert_eq!(description.state(), crate::runtime::RunState::Failed);
        assert!(service.processes().get("sleep").unwrap().status.is_running());
        assert!(!service.context().environment().contains_key("AFTER"));

        service.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_returns_when_processes_exit() {
        let mut description = LaunchDescription::new();
        description.add_action(
            ExecuteProcess::new([
                Substitution::literal("sh"),
                Substitution::literal("-c"),
                Substitution::literal("echo done"),
            ])
            .with_output(crate::runtime::OutputPolicy::Capture),
        );

        let config = ExecutorConfig {
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let mut service = LaunchService::new(LaunchContext::new(), config);
        service.launch(&mut description).unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        tokio::time::timeout(Duration::from_secs(5), service.wait(shutdown_rx))
            .await
            .unwrap();

        assert_eq!(service.status()[0].1, ProcessStatus::Stopped(Some(0)));
    }

    fn shell(name: &str, script: &str) -> ExecuteProcess {
        ExecuteProcess::new([
            Substitution::literal("sh"),
            Substitution::literal("-c"),
            Substitution::literal(script),
        ])
        .with_name(name)
        .with_output(crate::runtime::OutputPolicy::Capture)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chatty_process_does_not_starve_polling() {
        let mut description = LaunchDescription::new();
        description.add_action(shell("chatty", "while true; do echo tick; sleep 0.05; done"));
        description.add_action(shell("quick", "exit 4"));

        let config = ExecutorConfig {
            shutdown_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(200),
        };
        let mut service = LaunchService::new(LaunchContext::new(), config);
        service.launch(&mut description).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = shutdown_tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(5), service.wait(shutdown_rx))
            .await
            .unwrap();

        assert_eq!(
            service.status(),
            vec![
                ("chatty", ProcessStatus::Running),
                ("quick", ProcessStatus::Stopped(Some(4))),
            ]
        );

        service.shutdown().await;
        assert!(service.status().iter().all(|(_, status)| status.is_stopped()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_signal_stops_live_processes() {
        let mut description = LaunchDescription::new();
        description.add_action(ExecuteProcess::new([
            Substitution::literal("sleep"),
            Substitution::literal("30"),
        ]));
        description.add_action(
            ExecuteProcess::new([Substitution::literal("sleep"), Substitution::literal("30")])
                .with_name("second"),
        );

        let config = ExecutorConfig {
            shutdown_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        };
        let mut service = LaunchService::new(LaunchContext::new(), config);
        service.launch(&mut description).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), service.wait(shutdown_rx))
            .await
            .unwrap();

        // Cancellation returns from wait without touching the children
        assert!(service.status().iter().all(|(_, status)| status.is_running()));

        service.shutdown().await;
        assert!(service.status().iter().all(|(_, status)| status.is_stopped()));
        assert!(service.processes().handles().all(|h| h.pid.is_none()));
    }
}
