// First-run seeding: admin credential, initial teams, player import.
//
// Seeding is idempotent by construction: credentials and teams are only
// written when the credential store is empty, players only when the player
// ledger is empty. A restarted server with a populated database changes
// nothing.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;

/// One row of the player import CSV: `name,positions,base_price` with
/// positions pipe-separated (e.g. "ST|LW").
#[derive(Debug, Deserialize)]
struct PlayerRow {
    name: String,
    positions: String,
    base_price: u64,
}

pub fn run(db: &Database, config: &Config) -> anyhow::Result<()> {
    if db.user_count()? == 0 {
        seed_credentials(db, config)?;
    } else {
        info!("credential store already populated, skipping credential seed");
    }

    if let Some(csv_path) = &config.seed.players_csv {
        if db.player_count()? == 0 {
            let count = seed_players_from_csv(db, csv_path)?;
            info!("seeded {count} players from {}", csv_path.display());
        } else {
            info!("player ledger already populated, skipping CSV import");
        }
    }

    Ok(())
}

fn seed_credentials(db: &Database, config: &Config) -> anyhow::Result<()> {
    match &config.seed.admin_token {
        Some(token) => {
            db.create_user(&config.seed.admin_username, token, "admin", None)
                .context("failed to seed admin credential")?;
            info!("seeded admin credential for '{}'", config.seed.admin_username);
        }
        None => warn!("no seed.admin_token configured; no admin credential seeded"),
    }

    for team in &config.seed.teams {
        let budget = team.budget.unwrap_or(config.auction.default_budget);
        db.create_team_with_owner(&team.name, &team.owner, &team.token, budget)
            .with_context(|| format!("failed to seed team '{}'", team.name))?;
        info!(team = %team.name, owner = %team.owner, budget, "seeded team");
    }

    Ok(())
}

fn seed_players_from_csv(db: &Database, path: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open player CSV {}", path.display()))?;
    seed_players_from_reader(db, file)
}

/// Reader-based loader so tests can run without temp files. Malformed rows
/// are skipped with a warning; a zero base price would be unbiddable and is
/// skipped too.
fn seed_players_from_reader<R: Read>(db: &Database, rdr: R) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut count = 0;
    for result in reader.deserialize::<PlayerRow>() {
        match result {
            Ok(row) => {
                if row.base_price == 0 {
                    warn!("skipping player '{}': zero base price", row.name.trim());
                    continue;
                }
                let positions: Vec<String> = row
                    .positions
                    .split('|')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                db.create_player(row.name.trim(), &positions, row.base_price)?;
                count += 1;
            }
            Err(e) => {
                warn!("skipping malformed player row: {e}");
            }
        }
    }
    Ok(count)
}
