use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "deskwarden-cli", version, about = "Deskwarden CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Session statistics
    Stats {
        #[command(subcommand)]
        action: commands::stats::StatsAction,
    },
    /// Export session history as JSON
    Export(commands::export::ExportArgs),
    /// Replay a recorded frame stream offline
    Replay(commands::replay::ReplayArgs),
    /// Run the monitor live on a frame stream from stdin
    Run(commands::run::RunArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Stats { action } => commands::stats::run(action),
        Commands::Export(args) => commands::export::run(args),
        Commands::Replay(args) => commands::replay::run(args),
        Commands::Run(args) => commands::run::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
