// ralph - run one supervised agent loop in the current directory
//
// Usage: ralph [config.json] [run_directory]
//
// Exit codes: 0 complete, 1 failed, 2 aborted by limit, 3 aborted by
// operator, 4 configuration error.

use std::path::PathBuf;

use ralph_lib::supervisor::install_signal_handlers;
use ralph_lib::{RalphConfig, Supervisor, SupervisorError};

const EXIT_CONFIG_ERROR: i32 = 4;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [config.json] [run_directory]", args[0]);
        std::process::exit(0);
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let run_dir = match resolve_run_dir(&args) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    println!("Starting ralph in {}", run_dir.display());

    let mut supervisor = match Supervisor::new(config, &run_dir).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("Error: {}", e);
            let code = match e {
                SupervisorError::Config(_) => EXIT_CONFIG_ERROR,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    install_signal_handlers(supervisor.cancel_token(), supervisor.pause_flag());

    match supervisor.run().await {
        Ok(report) => {
            println!();
            println!("State:      {}", report.state);
            println!("Iterations: {}", report.iterations_recorded);
            println!("Cost:       ${:.4}", report.total_cost_usd);
            println!("Duration:   {:.1}s", report.duration_seconds);
            if let Some(reason) = &report.abort_reason {
                println!("Reason:     {}", reason);
            }
            if let Some(path) = &report.metrics_path {
                println!("Metrics:    {}", path.display());
            }
            std::process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> Result<RalphConfig, SupervisorError> {
    match args.get(1) {
        Some(path) => RalphConfig::load(std::path::Path::new(path)),
        None => {
            let default = std::path::Path::new("ralph.json");
            if default.exists() {
                RalphConfig::load(default)
            } else {
                RalphConfig::from_env()
            }
        }
    }
}

fn resolve_run_dir(args: &[String]) -> Result<PathBuf, SupervisorError> {
    let dir = match args.get(2) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)?;
    Ok(std::fs::canonicalize(&dir)?)
}
