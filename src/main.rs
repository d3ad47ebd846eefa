// shipwright CLI

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use shipwright::compiler::{compile, CompiledTask};
use shipwright::executor::{limit_tasks, run_tasks, DefaultConnector, Engine, EngineConfig};
use shipwright::output::plan::{display_plan, prompt_confirmation, total_commands};
use shipwright::output::{DeployError, TerminalOutput};
use shipwright::parser::load_descriptor_file;

#[derive(Parser)]
#[command(
    name = "shipwright",
    about = "Compile deployment descriptors and run them over SSH",
    version,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Preview, confirm, then run a descriptor
    Run {
        /// Path to the descriptor (JSON, or YAML by extension)
        #[arg(default_value = "app.json")]
        descriptor: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,

        /// Only run these hosts (comma-separated)
        #[arg(short, long)]
        limit: Option<String>,

        /// SSH connection timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Prompt for a password used by servers without one
        #[arg(short = 'k', long)]
        ask_pass: bool,
    },

    /// Show the compiled commands without connecting anywhere
    Plan {
        #[arg(default_value = "app.json")]
        descriptor: PathBuf,

        /// Only show these hosts (comma-separated)
        #[arg(short, long)]
        limit: Option<String>,
    },

    /// Compile a descriptor and report errors
    Validate {
        #[arg(default_value = "app.json")]
        descriptor: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            descriptor,
            yes,
            limit,
            timeout,
            ask_pass,
        } => {
            run_descriptor(
                &descriptor,
                yes,
                limit.as_deref(),
                timeout,
                ask_pass,
                cli.verbose,
                cli.quiet,
            )
            .await
        }
        Commands::Plan { descriptor, limit } => plan_descriptor(&descriptor, limit.as_deref()),
        Commands::Validate { descriptor } => validate_descriptor(&descriptor),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

/// Warnings by default so the terminal output stays readable; RUST_LOG overrides
fn init_tracing(verbose: bool) {
    let default = if verbose { "shipwright=debug" } else { "shipwright=warn" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .without_time()
        .init();
}

/// Load and compile; nothing here touches the network
fn load_tasks(path: &Path, limit: Option<&str>) -> Result<Vec<CompiledTask>, DeployError> {
    let descriptor = load_descriptor_file(path)?;
    debug!(
        path = %path.display(),
        servers = descriptor.servers.len(),
        globals = descriptor.globals.len(),
        "descriptor loaded"
    );

    let tasks = compile(&descriptor)?;
    Ok(limit_tasks(tasks, limit))
}

async fn run_descriptor(
    path: &Path,
    auto_approve: bool,
    limit: Option<&str>,
    timeout: u64,
    ask_pass: bool,
    verbose: bool,
    quiet: bool,
) -> Result<(), DeployError> {
    let tasks = load_tasks(path, limit)?;

    if tasks.is_empty() {
        println!("{}", "Nothing to execute.".yellow());
        return Ok(());
    }

    display_plan(&tasks);

    let proceed = prompt_confirmation(auto_approve).map_err(|e| DeployError::Runtime {
        message: format!("Failed to read confirmation: {}", e),
        suggestion: Some("Pass --yes to run non-interactively".to_string()),
    })?;

    if !proceed {
        println!();
        println!("{}", "Run cancelled.".yellow());
        return Ok(());
    }

    let fallback_password = if ask_pass {
        Some(prompt_password("SSH Password: ")?)
    } else {
        None
    };

    let config = EngineConfig {
        connect_timeout: Duration::from_secs(timeout),
        fallback_password,
        date: None,
    };

    let connector = DefaultConnector::new(&config);
    let output = TerminalOutput::new(verbose, quiet);
    let engine = Engine::new(&connector, &output, config);

    info!(servers = tasks.len(), commands = total_commands(&tasks), "starting run");
    let recap = run_tasks(tasks, &engine).await?;
    output.print_recap(&recap);

    Ok(())
}

fn plan_descriptor(path: &Path, limit: Option<&str>) -> Result<(), DeployError> {
    let tasks = load_tasks(path, limit)?;

    if tasks.is_empty() {
        println!("{}", "Nothing to execute.".yellow());
        return Ok(());
    }

    display_plan(&tasks);
    Ok(())
}

fn validate_descriptor(path: &Path) -> Result<(), DeployError> {
    let tasks = load_tasks(path, None)?;

    println!(
        "{} {} ({} servers, {} commands)",
        "✓".green(),
        path.display(),
        tasks.len(),
        total_commands(&tasks)
    );
    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String, DeployError> {
    // stderr so the prompt shows even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    let password = rpassword::read_password().map_err(|e| DeployError::Runtime {
        message: format!("Failed to read password: {}", e),
        suggestion: Some("Put the password in the descriptor instead".to_string()),
    })?;

    let password = password.trim().to_string();

    if password.is_empty() {
        return Err(DeployError::Runtime {
            message: "Password cannot be empty".to_string(),
            suggestion: Some("Enter a password when prompted".to_string()),
        });
    }

    Ok(password)
}
