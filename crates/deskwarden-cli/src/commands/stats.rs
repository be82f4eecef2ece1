use chrono::Utc;
use clap::Subcommand;
use deskwarden_core::SqliteStore;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's posture summary
    Today,
    /// Daily summaries for the last seven days
    Week,
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open()?;
    let today = Utc::now().date_naive();

    match action {
        StatsAction::Today => {
            let summary = store.daily_summary(today)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        StatsAction::Week => {
            let trend = store.weekly_trend(today)?;
            println!("{}", serde_json::to_string_pretty(&trend)?);
        }
    }
    Ok(())
}
