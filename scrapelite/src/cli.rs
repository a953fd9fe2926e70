use clap::{Parser, Subcommand};

/// scrapelite - sandboxed executor for TypeScript scraper scripts
#[derive(Parser, Debug)]
#[command(name = "scrapelite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script file in a fresh sandbox and print the result envelope
    Run {
        /// Path to the script. Use "-" to read from stdin
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Declared dependency (repeatable or comma separated), e.g. zod or lodash@^4
        #[arg(long = "dep", value_name = "PACKAGE", value_delimiter = ',')]
        deps: Vec<String>,

        /// Tool type: stagehand, playwright, hybrid, ...
        #[arg(long, default_value = "unknown")]
        tool_type: String,

        /// Advisory item bound exposed to the script as MAX_ITEMS
        #[arg(long, default_value_t = scrapelite_core::protocol::DEFAULT_MAX_ITEMS)]
        max_items: u64,

        /// Expose TEST_MODE=true to the script
        #[arg(long, default_value = "false")]
        test_mode: bool,

        /// Script timeout in seconds (default: from env or 300)
        #[arg(long)]
        timeout: Option<u64>,

        /// Process-group memory limit in MB, 0 disables (default: from env or 2048)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Parent directory for ephemeral workspaces
        #[arg(long, value_name = "DIR", env = "SCRAPELITE_WORK_DIR")]
        work_dir: Option<String>,
    },

    /// Execute a JSON ExecutionRequest and print the result envelope
    Exec {
        /// Request JSON, a path to a JSON file, or "-" to read from stdin
        #[arg(value_name = "REQUEST_JSON")]
        request: String,

        /// Process-group memory limit in MB, 0 disables (default: from env or 2048)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Parent directory for ephemeral workspaces
        #[arg(long, value_name = "DIR", env = "SCRAPELITE_WORK_DIR")]
        work_dir: Option<String>,
    },

    /// Dry run: print the package manifest and the rewritten script without installing anything
    Plan {
        /// Path to the script. Use "-" to read from stdin
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Declared dependency (repeatable or comma separated)
        #[arg(long = "dep", value_name = "PACKAGE", value_delimiter = ',')]
        deps: Vec<String>,

        /// Tool type: stagehand, playwright, hybrid, ...
        #[arg(long, default_value = "unknown")]
        tool_type: String,
    },

    /// Run as a JSON-RPC 2.0 server
    Serve {
        /// Read requests from stdin and write responses to stdout, one per line
        #[arg(long)]
        stdio: bool,
    },
}
