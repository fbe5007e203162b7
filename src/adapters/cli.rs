//! CLI adapter — interactive and single-message command line interface.

use std::io::{self, BufRead, Write};

use colored::*;

use crate::orchestrator::Orchestrator;
use crate::ui;
use crate::Result;

/// Inputs that end the interactive loop (case-insensitive).
pub const EXIT_COMMANDS: [&str; 3] = ["quit", "exit", "sair"];

pub fn is_exit_command(input: &str) -> bool {
    EXIT_COMMANDS
        .iter()
        .any(|cmd| input.trim().eq_ignore_ascii_case(cmd))
}

/// CLI channel for interactive orchestrator sessions.
pub struct CliChannel {
    orchestrator: Orchestrator,
}

impl CliChannel {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run a single request and return the answer.
    pub async fn run_once(&mut self, message: &str) -> String {
        let spinner = ui::spinner("Processing");
        let response = self.orchestrator.process_request(message).await;
        spinner.finish_and_clear();
        response
    }

    /// Run interactive REPL loop until an exit command or EOF.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        println!(
            "\n  Type your requests ({} to leave)",
            EXIT_COMMANDS.join("/").cyan()
        );

        loop {
            print!("\n\x1b[1;34mYou\x1b[0m: ");
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if is_exit_command(input) {
                break;
            }

            let response = self.run_once(input).await;
            println!("\n\x1b[1;32mAgent\x1b[0m: {}", response);
        }

        println!("\n👋 Disconnecting...");
        self.orchestrator.disconnect();
        Ok(())
    }
}
