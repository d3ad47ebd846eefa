// Rich terminal output for shipwright

use std::io::IsTerminal;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::executor::backup::BackupOutcome;
use crate::executor::{CommandResult, Operation, Target};

/// Terminal output manager
pub struct TerminalOutput {
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // https://no-color.org/
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            verbose,
            quiet,
            is_tty,
        }
    }

    /// Output that prints nothing, for tests and `--quiet`
    pub fn silent() -> Self {
        TerminalOutput {
            verbose: false,
            quiet: true,
            is_tty: false,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Print a header before connecting to a server
    pub fn print_server_header(&self, target: &Target, index: usize, total: usize) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({}/{})",
            "SERVER".green().bold(),
            target.ssh_target().cyan(),
            index,
            total
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    pub fn print_connected(&self, host: &str) {
        if self.quiet {
            return;
        }

        println!("  {} {}", "CONNECTED".green(), host.white().bold());
    }

    /// Print a command before it runs
    pub fn print_command(&self, command: &str, operation: &Operation) {
        if self.quiet {
            return;
        }

        let label = format!("{:<9}", operation.kind().to_uppercase());
        println!("  {} {}", label.yellow().bold(), command);
    }

    /// Print the captured output of a raw command
    pub fn print_command_output(&self, result: &CommandResult) {
        if self.quiet {
            return;
        }

        for line in result.stdout.lines() {
            println!("      {}", line.dimmed());
        }

        if self.verbose || !result.success() {
            for line in result.stderr.lines() {
                println!("      {}", line.red());
            }
        }
    }

    pub fn print_backup(&self, outcome: &BackupOutcome) {
        if self.quiet {
            return;
        }

        match outcome {
            BackupOutcome::Created(path) => {
                println!("      {} {}", "backed up to".green(), path)
            }
            BackupOutcome::AlreadyExists(path) => {
                println!("      {} {} already exists", "SKIPPED".cyan(), path)
            }
        }
    }

    /// Byte progress bar for one upload
    pub fn create_upload_progress(&self, label: &str, total: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total);

        let style = if self.is_tty {
            ProgressStyle::default_bar()
                .template("      {prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({percent}%)")
                .unwrap()
                .progress_chars("=> ")
        } else {
            ProgressStyle::default_bar()
                .template("      {prefix} {bytes}/{total_bytes}")
                .unwrap()
        };

        pb.set_style(style);
        pb.set_prefix(label.to_string());
        pb
    }

    pub fn print_upload_done(&self, remote_path: &str) {
        if self.quiet {
            return;
        }

        println!("      {} {}", "uploaded to".green(), remote_path);
    }

    /// Print the run recap summary
    pub fn print_recap(&self, recap: &RunRecap) {
        if self.quiet {
            return;
        }

        println!();
        println!("{}", "RUN RECAP".green().bold());
        println!("{}", "─".repeat(60).dimmed());

        for report in &recap.servers {
            let skipped = if report.backups_skipped > 0 {
                format!("skipped={}", report.backups_skipped).cyan()
            } else {
                format!("skipped={}", report.backups_skipped).normal()
            };

            println!(
                "{:<30} : {}    {}    {}    {}",
                report.host.white().bold(),
                format!("commands={}", report.executed).green(),
                format!("uploaded={}", report.uploaded).normal(),
                format!("backups={}", report.backups_created).normal(),
                skipped
            );
        }

        println!();
        println!("Total time: {:.2}s", recap.total_duration.as_secs_f64());
    }
}

/// What one server's run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub host: String,
    /// Commands dispatched, including skipped backups
    pub executed: usize,
    /// Files uploaded by `upload` and `uploaddir`
    pub uploaded: usize,
    pub backups_created: usize,
    pub backups_skipped: usize,
}

impl ServerReport {
    pub fn new(host: impl Into<String>) -> Self {
        ServerReport {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn record_backup(&mut self, outcome: &BackupOutcome) {
        match outcome {
            BackupOutcome::Created(_) => self.backups_created += 1,
            BackupOutcome::AlreadyExists(_) => self.backups_skipped += 1,
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Default, Clone)]
pub struct RunRecap {
    pub servers: Vec<ServerReport>,
    pub total_duration: Duration,
}

impl RunRecap {
    pub fn new() -> Self {
        RunRecap::default()
    }

    pub fn record(&mut self, report: ServerReport) {
        self.servers.push(report);
    }

    pub fn total_executed(&self) -> usize {
        self.servers.iter().map(|s| s.executed).sum()
    }

    pub fn total_uploaded(&self) -> usize {
        self.servers.iter().map(|s| s.uploaded).sum()
    }
}
