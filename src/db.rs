// SQLite persistence layer: the ledger of teams, players, and credentials,
// plus a key-value table holding the serialized auction lot snapshot.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

/// Lifecycle of a player in the auction pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Upcoming,
    Sold,
    Unsold,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Upcoming => "upcoming",
            PlayerStatus::Sold => "sold",
            PlayerStatus::Unsold => "unsold",
        }
    }

    fn from_db(s: &str) -> Result<Self> {
        match s {
            "upcoming" => Ok(PlayerStatus::Upcoming),
            "sold" => Ok(PlayerStatus::Sold),
            "unsold" => Ok(PlayerStatus::Unsold),
            other => bail!("unknown player status in database: {other}"),
        }
    }
}

/// A player record. `sold_price` and `bought_by` are set iff status is Sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: i64,
    pub name: String,
    /// One or more position tags (e.g. ["ST"] or ["ST", "LW"]).
    pub positions: Vec<String>,
    pub base_price: u64,
    pub status: PlayerStatus,
    pub sold_price: Option<u64>,
    pub bought_by: Option<i64>,
}

/// A team record. The roster is derived from sold players, never stored
/// separately, so it cannot drift from the player table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: i64,
    pub name: String,
    /// Username of the owner credential.
    pub owner: String,
    pub budget: u64,
    /// Ids of players this team has bought, ordered by player id.
    pub roster: Vec<i64>,
}

/// A credential record in the identity store. Tokens are opaque bearer
/// strings; hashing is the concern of whatever provisions them.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub token: String,
    pub role: String,
    pub team_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed persistence for the auction ledger.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS teams (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                owner  TEXT NOT NULL,
                budget INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS players (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                positions  TEXT NOT NULL,
                base_price INTEGER NOT NULL,
                status     TEXT NOT NULL DEFAULT 'upcoming',
                sold_price INTEGER,
                bought_by  INTEGER REFERENCES teams(id)
            );

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                token    TEXT NOT NULL UNIQUE,
                role     TEXT NOT NULL,
                team_id  INTEGER REFERENCES teams(id)
            );

            CREATE TABLE IF NOT EXISTS auction_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // -- Teams --------------------------------------------------------------

    /// Create a team and return its id. Fails on a duplicate name (UNIQUE
    /// constraint); callers wanting a typed error should check first.
    pub fn create_team(&self, name: &str, owner: &str, budget: u64) -> Result<i64> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO teams (name, owner, budget) VALUES (?1, ?2, ?3) RETURNING id",
                params![name, owner, budget],
                |row| row.get(0),
            )
            .context("failed to create team")?;
        Ok(id)
    }

    /// Create a team together with its owner credential in one transaction.
    /// Either both rows land or neither does.
    pub fn create_team_with_owner(
        &self,
        name: &str,
        owner: &str,
        token: &str,
        budget: u64,
    ) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let id: i64 = tx
            .query_row(
                "INSERT INTO teams (name, owner, budget) VALUES (?1, ?2, ?3) RETURNING id",
                params![name, owner, budget],
                |row| row.get(0),
            )
            .context("failed to create team")?;
        tx.execute(
            "INSERT INTO users (username, token, role, team_id) VALUES (?1, ?2, 'owner', ?3)",
            params![owner, token, id],
        )
        .context("failed to create owner credential")?;
        tx.commit().context("failed to commit team creation")?;
        Ok(id)
    }

    pub fn team(&self, id: i64) -> Result<Option<Team>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, name, owner, budget FROM teams WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u64>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to query team")?;

        match row {
            Some((id, name, owner, budget)) => {
                let roster = Self::roster_for(&conn, id)?;
                Ok(Some(Team {
                    id,
                    name,
                    owner,
                    budget,
                    roster,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn team_by_name(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id FROM teams WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .context("failed to query team by name")
    }

    /// All teams, ordered by id, rosters populated.
    pub fn teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, owner, budget FROM teams ORDER BY id")
            .context("failed to prepare teams query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u64>(3)?,
                ))
            })
            .context("failed to query teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team rows")?;

        let mut teams = Vec::with_capacity(rows.len());
        for (id, name, owner, budget) in rows {
            let roster = Self::roster_for(&conn, id)?;
            teams.push(Team {
                id,
                name,
                owner,
                budget,
                roster,
            });
        }
        Ok(teams)
    }

    pub fn update_team(&self, id: i64, name: &str, budget: u64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE teams SET name = ?2, budget = ?3 WHERE id = ?1",
            params![id, name, budget],
        )
        .context("failed to update team")?;
        Ok(())
    }

    /// Delete a team, its owner credentials, and its claim on any players in
    /// one transaction. Players the team had bought return to the pool as
    /// unsold so they can be relisted.
    pub fn delete_team(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "UPDATE players SET status = 'unsold', sold_price = NULL, bought_by = NULL
             WHERE bought_by = ?1",
            params![id],
        )
        .context("failed to release team players")?;
        tx.execute("DELETE FROM users WHERE team_id = ?1", params![id])
            .context("failed to delete team credentials")?;
        tx.execute("DELETE FROM teams WHERE id = ?1", params![id])
            .context("failed to delete team")?;
        tx.commit().context("failed to commit team deletion")
    }

    fn roster_for(conn: &Connection, team_id: i64) -> Result<Vec<i64>> {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM players WHERE bought_by = ?1 AND status = 'sold' ORDER BY id",
            )
            .context("failed to prepare roster query")?;
        let ids = stmt
            .query_map(params![team_id], |row| row.get(0))
            .context("failed to query roster")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .context("failed to map roster rows")?;
        Ok(ids)
    }

    // -- Players ------------------------------------------------------------

    /// Create a player in `upcoming` status and return its id.
    /// `positions` is stored as a JSON array string (e.g. `["ST","LW"]`).
    pub fn create_player(&self, name: &str, positions: &[String], base_price: u64) -> Result<i64> {
        let conn = self.conn();
        let positions_json =
            serde_json::to_string(positions).context("failed to serialize positions")?;
        let id: i64 = conn
            .query_row(
                "INSERT INTO players (name, positions, base_price, status)
                 VALUES (?1, ?2, ?3, 'upcoming') RETURNING id",
                params![name, positions_json, base_price],
                |row| row.get(0),
            )
            .context("failed to create player")?;
        Ok(id)
    }

    pub fn player(&self, id: i64) -> Result<Option<Player>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, positions, base_price, status, sold_price, bought_by
             FROM players WHERE id = ?1",
            params![id],
            Self::map_player_row,
        )
        .optional()
        .context("failed to query player")?
        .map(Self::finish_player_row)
        .transpose()
    }

    /// All players, ordered by id.
    pub fn players(&self) -> Result<Vec<Player>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, positions, base_price, status, sold_price, bought_by
                 FROM players ORDER BY id",
            )
            .context("failed to prepare players query")?;
        let rows = stmt
            .query_map([], Self::map_player_row)
            .context("failed to query players")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?;
        rows.into_iter().map(Self::finish_player_row).collect()
    }

    pub fn update_player(
        &self,
        id: i64,
        name: &str,
        positions: &[String],
        base_price: u64,
    ) -> Result<()> {
        let conn = self.conn();
        let positions_json =
            serde_json::to_string(positions).context("failed to serialize positions")?;
        conn.execute(
            "UPDATE players SET name = ?2, positions = ?3, base_price = ?4 WHERE id = ?1",
            params![id, name, positions_json, base_price],
        )
        .context("failed to update player")?;
        Ok(())
    }

    pub fn delete_player(&self, id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM players WHERE id = ?1", params![id])
            .context("failed to delete player")?;
        Ok(())
    }

    /// Set a player's status, clearing sale fields unless the status is Sold.
    pub fn set_player_status(&self, id: i64, status: PlayerStatus) -> Result<()> {
        let conn = self.conn();
        match status {
            PlayerStatus::Sold => bail!("sold status requires apply_sale"),
            _ => {
                conn.execute(
                    "UPDATE players SET status = ?2, sold_price = NULL, bought_by = NULL
                     WHERE id = ?1",
                    params![id, status.as_str()],
                )
                .context("failed to set player status")?;
            }
        }
        Ok(())
    }

    pub fn player_count(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
            .context("failed to count players")
    }

    /// Raw player row: positions JSON and status text are parsed outside the
    /// rusqlite closure so parse failures surface as anyhow errors.
    #[allow(clippy::type_complexity)]
    fn map_player_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, String, String, u64, String, Option<u64>, Option<i64>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn finish_player_row(
        raw: (i64, String, String, u64, String, Option<u64>, Option<i64>),
    ) -> Result<Player> {
        let (id, name, positions_json, base_price, status, sold_price, bought_by) = raw;
        let positions = serde_json::from_str(&positions_json)
            .context("failed to parse player positions")?;
        Ok(Player {
            id,
            name,
            positions,
            base_price,
            status: PlayerStatus::from_db(&status)?,
            sold_price,
            bought_by,
        })
    }

    // -- Sale / resolution transactions -------------------------------------

    /// Apply a finalized sale atomically: mark the player sold, debit the
    /// team's budget, and persist the resolved lot snapshot — all in one
    /// transaction, so a crash can never half-apply a sale.
    pub fn apply_sale(
        &self,
        player_id: i64,
        team_id: i64,
        price: u64,
        lot: &serde_json::Value,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let updated = tx
            .execute(
                "UPDATE players SET status = 'sold', sold_price = ?2, bought_by = ?3
                 WHERE id = ?1 AND status != 'sold'",
                params![player_id, price, team_id],
            )
            .context("failed to mark player sold")?;
        if updated != 1 {
            bail!("player {player_id} is missing or already sold");
        }

        let debited = tx
            .execute(
                "UPDATE teams SET budget = budget - ?2 WHERE id = ?1 AND budget >= ?2",
                params![team_id, price],
            )
            .context("failed to debit team budget")?;
        if debited != 1 {
            bail!("team {team_id} is missing or lacks budget for {price}");
        }

        Self::write_state(&tx, LOT_STATE_KEY, lot)?;
        tx.commit().context("failed to commit sale")
    }

    /// Mark the current player unsold and persist the resolved lot snapshot
    /// in one transaction.
    pub fn apply_unsold(&self, player_id: i64, lot: &serde_json::Value) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "UPDATE players SET status = 'unsold', sold_price = NULL, bought_by = NULL
             WHERE id = ?1",
            params![player_id],
        )
        .context("failed to mark player unsold")?;
        Self::write_state(&tx, LOT_STATE_KEY, lot)?;
        tx.commit().context("failed to commit unsold resolution")
    }

    // -- Key-value state ----------------------------------------------------

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        Self::write_state(&conn, key, value)
    }

    fn write_state(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO auction_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM auction_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query state")?;

        match json_str {
            Some(s) => {
                let value =
                    serde_json::from_str(&s).context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // -- Credentials --------------------------------------------------------

    pub fn create_user(
        &self,
        username: &str,
        token: &str,
        role: &str,
        team_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, token, role, team_id) VALUES (?1, ?2, ?3, ?4)",
            params![username, token, role, team_id],
        )
        .context("failed to create user")?;
        Ok(())
    }

    pub fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT username, token, role, team_id FROM users WHERE token = ?1",
            params![token],
            |row| {
                Ok(User {
                    username: row.get(0)?,
                    token: row.get(1)?,
                    role: row.get(2)?,
                    team_id: row.get(3)?,
                })
            },
        )
        .optional()
        .context("failed to query user by token")
    }

    pub fn user_count(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("failed to count users")
    }
}

/// Key under which the serialized auction lot lives in `auction_state`.
pub const LOT_STATE_KEY: &str = "lot";
