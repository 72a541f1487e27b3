//! CLI entry point: `tabula <files>... <query>`.

use std::process;

use clap::Parser;

use tabula::agent::Agent;
use tabula::llm::LlmPlanner;
use tabula::output::{ConsoleOutput, JsonOutput, OutputHandler};
use tabula::settings::LlmConfig;

#[derive(Parser)]
#[command(
    name = "tabula",
    about = "Natural-language agent for spreadsheet-like data",
    version
)]
struct Cli {
    /// Input data files (.csv, or .json workbooks)
    #[arg(required = true, num_args = 1..)]
    files: Vec<String>,

    /// Natural-language query, e.g. "average Profit for the East region"
    query: String,

    /// Show every step's outcome as it executes
    #[arg(short, long)]
    verbose: bool,

    /// Emit machine-readable JSON lines instead of formatted text
    #[arg(long)]
    json: bool,
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tabula=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output: Box<dyn OutputHandler> = if cli.json {
        Box::new(JsonOutput)
    } else {
        Box::new(ConsoleOutput)
    };

    let config = match LlmConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            output.error(&e.to_string());
            process::exit(2);
        }
    };
    let planner = match LlmPlanner::new(&config) {
        Ok(planner) => planner,
        Err(e) => {
            output.error(&e.to_string());
            process::exit(2);
        }
    };

    let agent = Agent::new(&planner, output.as_ref(), cli.verbose);
    if let Err(e) = agent.run(&cli.files, &cli.query) {
        output.error(&e.to_string());
        process::exit(1);
    }
}
