use chrono::Utc;
use clap::Args;
use deskwarden_core::{storage, SqliteStore};

#[derive(Args)]
pub struct ExportArgs {
    /// How many days of history to include
    #[arg(long, default_value_t = 7)]
    pub days: i64,
    /// Write to a file instead of stdout
    #[arg(long)]
    pub output: Option<std::path::PathBuf>,
}

pub fn run(args: ExportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open()?;
    let document = storage::export(&store, args.days, Utc::now())?;
    let json = serde_json::to_string_pretty(&document)?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("exported {} sessions to {}", document.sessions.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
