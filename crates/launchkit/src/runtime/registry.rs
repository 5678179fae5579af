//! Registry of the processes spawned during a launch run

use crate::runtime::process::{
    EventSender, ProcessConfig, ProcessError, ProcessHandle, ProcessStatus,
};
use indexmap::IndexMap;
use std::time::Duration;

/// Owns every process handle created by `ExecuteProcess` actions
///
/// In dry-run mode nothing is spawned; resolved configurations are recorded
/// so they can be shown as a launch plan.
pub struct ProcessRegistry {
    processes: IndexMap<String, ProcessHandle>,
    planned: Vec<ProcessConfig>,
    dry_run: bool,
    event_tx: Option<EventSender>,
}

impl ProcessRegistry {
    /// Registry that spawns processes and reports their events on `event_tx`
    pub fn new(event_tx: EventSender) -> Self {
        Self {
            processes: IndexMap::new(),
            planned: Vec::new(),
            dry_run: false,
            event_tx: Some(event_tx),
        }
    }

    /// Registry that records configurations without spawning
    pub fn dry_run() -> Self {
        Self {
            processes: IndexMap::new(),
            planned: Vec::new(),
            dry_run: true,
            event_tx: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn is_taken(&self, name: &str) -> bool {
        self.processes.contains_key(name) || self.planned.iter().any(|p| p.name == name)
    }

    /// `base`, or `base-N` for the first free N starting at 2
    fn unique_name(&self, base: &str) -> String {
        if !self.is_taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Spawn (or plan) a process and return the name it was registered under
    pub fn spawn(&mut self, mut config: ProcessConfig) -> Result<String, ProcessError> {
        if config.cmd.is_empty() {
            return Err(ProcessError::EmptyCommand(config.name));
        }
        config.name = self.unique_name(&config.name);
        let name = config.name.clone();

        if self.dry_run {
            log::debug!("[{}] Planned: {}", name, config.cmd.join(" "));
            self.planned.push(config);
            return Ok(name);
        }

        let mut handle = ProcessHandle::new(config);
        if let Some(tx) = &self.event_tx {
            handle = handle.with_event_sender(tx.clone());
        }
        handle.start()?;
        self.processes.insert(name.clone(), handle);
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&ProcessHandle> {
        self.processes.get(name)
    }

    /// Spawned handles in launch order
    pub fn handles(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.processes.values()
    }

    /// Configurations recorded in dry-run mode
    pub fn planned(&self) -> &[ProcessConfig] {
        &self.planned
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Poll every handle, returning whether any is still running
    pub fn poll(&mut self) -> bool {
        let mut any_running = false;
        for process in self.processes.values_mut() {
            if process.check_status().is_running() {
                any_running = true;
            }
        }
        any_running
    }

    /// Status of every spawned process
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|(name, process)| (name.as_str(), process.status))
            .collect()
    }

    /// Stop all live processes in reverse launch order
    pub async fn shutdown(&mut self, timeout: Duration) {
        for process in self.processes.values_mut().rev() {
            if process.check_status().is_running() {
                process.stop(timeout).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::OutputPolicy;

    fn config(name: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            cmd: vec!["/opt/bin/controller".to_string()],
            env: IndexMap::new(),
            working_dir: None,
            output: OutputPolicy::Inherit,
        }
    }

    #[test]
    fn test_dry_run_records_unique_names() {
        let mut registry = ProcessRegistry::dry_run();

        assert_eq!(registry.spawn(config("controller")).unwrap(), "controller");
        assert_eq!(registry.spawn(config("controller")).unwrap(), "controller-2");
        assert_eq!(registry.spawn(config("controller")).unwrap(), "controller-3");
        assert_eq!(registry.spawn(config("planner")).unwrap(), "planner");

        assert_eq!(registry.planned().len(), 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_command_rejected_in_dry_run() {
        let mut registry = ProcessRegistry::dry_run();
        let mut cfg = config("empty");
        cfg.cmd.clear();

        assert!(matches!(
            registry.spawn(cfg),
            Err(ProcessError::EmptyCommand(name)) if name == "empty"
        ));
        assert!(registry.planned().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut registry = ProcessRegistry::new(tx);

        for name in ["first", "second"] {
            let mut cfg = config(name);
            cfg.cmd = vec!["sleep".to_string(), "30".to_string()];
            registry.spawn(cfg).unwrap();
        }
        assert_eq!(registry.len(), 2);
        assert!(registry.poll());

        registry.shutdown(Duration::from_secs(5)).await;

        assert!(!registry.poll());
        assert!(registry.handles().all(|h| h.status.is_stopped()));
    }
}
