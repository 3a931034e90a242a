//! Load test CLI for the query service.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use query_load_test::{LoadRunner, ResultsReport, TestConfig, TestResults};

#[derive(Parser)]
#[command(name = "query-load-test")]
#[command(about = "Simulates users repeatedly calling GET /query", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override number of simulated users
        #[arg(short, long)]
        users: Option<u32>,

        /// Override users started per second
        #[arg(short = 'r', long)]
        spawn_rate: Option<f64>,

        /// Override test duration in seconds
        #[arg(short = 't', long)]
        run_time: Option<u64>,

        /// Override target host
        #[arg(short = 'H', long, env = "LOAD_TEST_HOST")]
        host: Option<String>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,

        /// Directory for request logs when the scenario enables them
        #[arg(long, env = "LOAD_TEST_RESULTS_DIR")]
        results_dir: Option<PathBuf>,
    },

    /// Run a quick smoke test
    Quick {
        /// Target host
        #[arg(short = 'H', long, env = "LOAD_TEST_HOST", default_value = "http://localhost:8080")]
        host: String,

        /// Number of simulated users
        #[arg(short, long, default_value = "5")]
        users: u32,

        /// Total number of requests
        #[arg(short, long, default_value = "100")]
        requests: u64,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            users,
            spawn_rate,
            run_time,
            host,
            output,
            results_dir,
        } => {
            println!("Loading scenario: {}", scenario.display());

            let mut config = TestConfig::from_file(&scenario)?;

            if let Some(u) = users {
                config.users = u;
            }
            if let Some(r) = spawn_rate {
                config.spawn_rate = r;
            }
            if let Some(t) = run_time {
                config.duration_secs = t;
            }
            if let Some(h) = host {
                config.host = h;
            }
            if let Some(dir) = results_dir {
                config.results_dir = Some(dir);
            }

            config.validate()?;

            println!("✓ Configuration loaded successfully");
            println!("  Name: {}", config.name);
            println!("  Description: {}", config.description);
            println!();

            let mut runner = LoadRunner::new(config)?;
            let results = runner.run().await?;

            print_results(&results, &output)
        }
        Commands::Quick {
            host,
            users,
            requests,
        } => {
            println!("Running quick test:");
            println!("  Host: {}", host);
            println!("  Users: {}", users);
            println!("  Requests: {}", requests);
            println!();

            let config = TestConfig::quick(host, users, requests);
            config.validate()?;

            let mut runner = LoadRunner::new(config)?;
            let results = runner.run().await?;

            print_results(&results, "table")
        }
        Commands::List { dir } => {
            list_scenarios(&dir);
            Ok(())
        }
    }
}

fn print_results(results: &TestResults, output: &str) -> anyhow::Result<()> {
    match output {
        "json" => {
            println!("{}", ResultsReport::format_json(results)?);
        }
        "csv" => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(results));
        }
        _ => {
            println!("{}", ResultsReport::format_table(results));
        }
    }
    Ok(())
}

fn list_scenarios(dir: &Path) {
    println!("Available scenarios in {}:", dir.display());
    println!();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, dir = %dir.display(), "Error reading scenarios directory");
            eprintln!("Make sure the directory exists and is readable");
            return;
        }
    };

    let mut scenarios = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        match TestConfig::from_file(&path) {
            Ok(config) => {
                let filename = path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();
                scenarios.push((filename, config.name, config.description));
            }
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "Skipping invalid scenario"),
        }
    }

    scenarios.sort_by(|a, b| a.0.cmp(&b.0));

    if scenarios.is_empty() {
        println!("No scenario files found");
        return;
    }
    for (filename, name, desc) in scenarios {
        println!("  {} - {}", filename, name);
        println!("    {}", desc);
        println!();
    }
}
