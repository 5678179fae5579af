//! launchkit CLI
//!
//! Usage:
//!   launchkit launch/nav.launch.yaml
//!   launchkit launch/nav.launch.yaml -a autostart:=false
//!   launchkit launch/nav.launch.yaml --dry-run --json

use launchkit::{
    ExecutorConfig, LaunchArgs, LaunchContext, LaunchFile, LaunchService, YamlRewriter,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // Load launch file
    log::info!("Loading launch file: {}", args.launch_file);
    let launch_file = match LaunchFile::from_file(&args.launch_file) {
        Ok(lf) => lf,
        Err(e) => {
            log::error!("Failed to load launch file: {}", e);
            std::process::exit(1);
        }
    };

    let mut description = match launch_file.to_description() {
        Ok(d) => d,
        Err(e) => {
            log::error!("Invalid launch file: {}", e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!("Launch file '{}' is valid", args.launch_file);
        println!("  Version: {}", launch_file.version);
        println!("  Params: {}", launch_file.params.len());
        println!("  Actions: {}", description.len());
        return;
    }

    if args.show_args {
        let declared = description.declared_arguments();
        if declared.is_empty() {
            println!("No arguments declared");
        }
        for arg in declared {
            println!("{}:", arg.name);
            if let Some(text) = &arg.description {
                println!("  {}", text);
            }
            println!("  (default: '{}')", arg.default);
        }
        return;
    }

    let launch_dir = Path::new(&args.launch_file)
        .parent()
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            }
        })
        .and_then(|dir| dir.canonicalize().ok());

    let mut context = LaunchContext::new().with_args(args.arg_overrides());
    context.set_launch_file_dir(launch_dir);

    // Dry run mode
    if args.dry_run {
        // Plans leave no rewritten parameter files behind
        let context = context.with_rewriter(Arc::new(YamlRewriter::new().with_dry_run(true)));
        let plan = match LaunchService::plan(context, &mut description) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        };

        if args.json {
            match serde_json::to_string_pretty(&plan) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    log::error!("Failed to serialize launch plan: {}", e);
                    std::process::exit(1);
                }
            }
        } else {
            println!("{}", plan);
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    let mut service = LaunchService::new(context, ExecutorConfig::default());

    // Run every action
    if let Err(e) = service.launch(&mut description) {
        log::error!("Launch failed: {}", e);
        service.shutdown().await;
        std::process::exit(1);
    }

    // Wait for shutdown signal or all processes to exit
    service.wait(shutdown_rx).await;

    // Shutdown all processes
    service.shutdown().await;

    log::info!("launchkit exiting");
}
