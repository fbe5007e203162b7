//! Orchestra CLI entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use orchestra::adapters::cli::CliChannel;
use orchestra::config::{self, Config};
use orchestra::{ui, Orchestrator};

#[derive(Parser)]
#[command(name = "orchestra")]
#[command(about = "Orchestra - plan and run tools from external providers with an LLM")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.orchestra/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the configuration interactively
    Init,

    /// Chat with the orchestrator
    Chat {
        /// Single request to process; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Connect to every provider and list its tools
    Tools,

    /// Show configuration status
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    install_interrupt_handler();

    let path = cli.config.unwrap_or_else(config::config_path);

    match cli.command {
        Commands::Init => {
            config::init(&path)?;
        }

        Commands::Chat { message } => {
            let config = config::load_from(&path)?;
            let orchestrator = connect(&config).await?;
            let mut channel = CliChannel::new(orchestrator);

            match message {
                Some(msg) => {
                    let response = channel.run_once(&msg).await;
                    println!("\n{}", response);
                }
                None => channel.run_interactive().await?,
            }
        }

        Commands::Tools => {
            let config = config::load_from(&path)?;
            connect(&config).await?;
        }

        Commands::Status => {
            let config = config::load_from(&path)?;
            println!("Orchestra Status\n");
            println!("Config: {:?}{}", path, if path.exists() { "" } else { " (defaults)" });
            println!("Endpoint: {}", config.base_url);
            println!("API key: {}", if config.api_key.is_empty() { "not set" } else { "✓" });
            println!("Planning model: {}", config.planner_model);
            println!("Answer model: {}", config.synthesis_model);
            println!("Providers:");
            for provider in &config.providers {
                println!("  {}: {} {}", provider.name, provider.command, provider.args.join(" "));
            }
        }
    }

    Ok(())
}

/// Build the orchestrator and list every provider's tools.
async fn connect(config: &Config) -> Result<Orchestrator> {
    let mut orchestrator = Orchestrator::from_config(config)?;

    ui::print_header(&config.planner_model, &config.synthesis_model);
    ui::print_thinking("Connecting to tool providers");

    let report = orchestrator.connect_providers().await;
    for (provider, error) in &report.failed {
        ui::print_warning(&format!("{provider}: {error}"));
    }
    if report.connected.is_empty() {
        ui::print_error("No tool provider could be reached");
    }
    ui::print_tools(&orchestrator.tools());

    Ok(orchestrator)
}

/// First Ctrl+C warns, a second within three seconds exits.
fn install_interrupt_handler() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let armed = Arc::new(AtomicBool::new(false));
    let flag = armed.clone();

    ctrlc::set_handler(move || {
        if flag.load(Ordering::SeqCst) {
            println!("\n👋 Bye!");
            std::process::exit(0);
        }

        println!("\n⚠️  Press Ctrl+C again to exit");
        flag.store(true, Ordering::SeqCst);

        let reset = flag.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            reset.store(false, Ordering::SeqCst);
        });
    })
    .ok();
}
