//! scrapelite CLI library.

mod cli;
mod commands;
mod stdio_rpc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use commands::execute;
use scrapelite_core::protocol::{ExecutionRequest, ResultEnvelope};

fn print_envelope(envelope: &ResultEnvelope) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if !envelope.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Run the CLI: parse args and dispatch to command handlers.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    scrapelite_core::observability::init_tracing();

    match cli.command {
        Commands::Serve { stdio } => {
            if stdio {
                stdio_rpc::serve_stdio()?;
            } else {
                anyhow::bail!("Only --stdio transport is supported");
            }
        }
        Commands::Run {
            script,
            deps,
            tool_type,
            max_items,
            test_mode,
            timeout,
            max_memory,
            work_dir,
        } => {
            let script_code = execute::read_script(&script)?;
            let settings = execute::settings_with_overrides(max_memory, timeout, work_dir);
            let request = ExecutionRequest {
                script_code,
                dependencies: deps,
                tool_type,
                max_items,
                test_mode,
                timeout_seconds: timeout,
            };
            let envelope = execute::execute_request(settings, &request);
            print_envelope(&envelope)?;
        }
        Commands::Exec {
            request,
            max_memory,
            work_dir,
        } => {
            let request = execute::read_request(&request)?;
            let settings = execute::settings_with_overrides(max_memory, None, work_dir);
            let envelope = execute::execute_request(settings, &request);
            print_envelope(&envelope)?;
        }
        Commands::Plan {
            script,
            deps,
            tool_type,
        } => {
            let script_code = execute::read_script(&script)?;
            let settings = scrapelite_core::config::ProvisioningConfig::from_env();
            let opts = scrapelite_sandbox::transform::TransformOptions {
                display: settings.display,
            };
            let plan = execute::plan(&script_code, &deps, &tool_type, &opts);
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}
