// Compiled command preview and the single go/no-go prompt

use colored::*;

use crate::compiler::CompiledTask;
use crate::executor::Operation;

/// Display every compiled command, grouped by server
pub fn display_plan(tasks: &[CompiledTask]) {
    println!();
    println!(
        "{} {} commands across {} servers",
        "Plan:".cyan().bold(),
        total_commands(tasks),
        tasks.len()
    );

    for task in tasks {
        println!();
        println!(
            "  {}:",
            format!("{}@{}:{}", task.username, task.host, task.port)
                .white()
                .bold()
        );

        for command in &task.commands {
            println!("    {}", describe_command(command));
        }
    }

    println!();
    println!("{}", "─".repeat(80).dimmed());
}

pub fn total_commands(tasks: &[CompiledTask]) -> usize {
    tasks.iter().map(|t| t.commands.len()).sum()
}

/// One preview line: built-in operations get a colored marker
fn describe_command(command: &str) -> String {
    let marker = match Operation::parse(command) {
        Operation::Raw(_) => "$".dimmed(),
        Operation::Upload { .. } | Operation::UploadDir { .. } => "↑".green(),
        Operation::Backup { .. } => "~".yellow(),
        Operation::ZipBackup { .. } => "+".yellow(),
    };

    format!("{} {}", marker, command)
}

/// Prompt for confirmation
pub fn prompt_confirmation(auto_approve: bool) -> Result<bool, std::io::Error> {
    if auto_approve {
        return Ok(true);
    }

    use std::io::{self, Write};

    print!("{} ", "Run the commands above? [y/N]".yellow().bold());
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}
