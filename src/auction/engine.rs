// The auction engine: validates and applies every state-changing command
// against the lot and the ledger, and says what to broadcast.
//
// The engine is owned by exactly one task and `apply` takes `&mut self`, so
// every command runs as an uninterrupted read-validate-write section. The
// in-memory lot is only replaced after the store write succeeds; a failed
// command leaves both unchanged.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::db::{Database, PlayerStatus, LOT_STATE_KEY};
use crate::protocol::{LotSnapshot, ServerMessage, StateSnapshot};
use crate::session::{Role, Session};

use super::error::AuctionError;
use super::state::{AuctionLot, BidRecord, LastAction, LastActionKind, LotStatus};

/// Every state-changing (or state-reading) operation, as one tagged type so
/// authorization and dispatch happen in a single place.
#[derive(Debug, Clone)]
pub enum Command {
    SendToBlock { player_id: i64, force: bool },
    PlaceBid { team_id: i64, amount: u64 },
    Pass { team_id: i64 },
    FinalizeBid,
    MarkUnsold,
    RelistPlayer { player_id: i64 },
    CreatePlayer {
        name: String,
        positions: Vec<String>,
        base_price: u64,
    },
    UpdatePlayer {
        player_id: i64,
        name: String,
        positions: Vec<String>,
        base_price: u64,
    },
    DeletePlayer { player_id: i64 },
    CreateTeam {
        name: String,
        budget: u64,
        owner: String,
        token: String,
    },
    UpdateTeam {
        team_id: i64,
        name: String,
        budget: u64,
    },
    DeleteTeam { team_id: i64 },
    GetState,
}

/// What a successful command produces: a fact for everyone, or a reply for
/// the originator alone (snapshots). Errors never reach the broadcast path.
#[derive(Debug)]
pub enum Outcome {
    Broadcast(ServerMessage),
    Reply(ServerMessage),
}

pub struct AuctionEngine {
    db: Arc<Database>,
    lot: AuctionLot,
    roster_limit: usize,
}

impl AuctionEngine {
    pub fn new(db: Arc<Database>, lot: AuctionLot, roster_limit: usize) -> Self {
        AuctionEngine {
            db,
            lot,
            roster_limit,
        }
    }

    /// Build an engine from the store, resuming a persisted lot if one was
    /// saved by a previous run.
    pub fn recover(db: Arc<Database>, roster_limit: usize) -> anyhow::Result<Self> {
        let lot = match db.load_state(LOT_STATE_KEY)? {
            Some(value) => serde_json::from_value(value)?,
            None => AuctionLot::default(),
        };
        Ok(Self::new(db, lot, roster_limit))
    }

    pub fn lot(&self) -> &AuctionLot {
        &self.lot
    }

    /// The single dispatch entry point. Authorization first, for every
    /// command; then the handler validates and applies.
    pub fn apply(&mut self, session: &Session, command: Command) -> Result<Outcome, AuctionError> {
        authorize(session, &command)?;
        match command {
            Command::SendToBlock { player_id, force } => self.send_to_block(player_id, force),
            Command::PlaceBid { team_id, amount } => self.place_bid(team_id, amount),
            Command::Pass { team_id } => self.pass(team_id),
            Command::FinalizeBid => self.finalize_bid(),
            Command::MarkUnsold => self.mark_unsold(),
            Command::RelistPlayer { player_id } => self.relist_player(player_id),
            Command::CreatePlayer {
                name,
                positions,
                base_price,
            } => self.create_player(&name, &positions, base_price),
            Command::UpdatePlayer {
                player_id,
                name,
                positions,
                base_price,
            } => self.update_player(player_id, &name, &positions, base_price),
            Command::DeletePlayer { player_id } => self.delete_player(player_id),
            Command::CreateTeam {
                name,
                budget,
                owner,
                token,
            } => self.create_team(&name, budget, &owner, &token),
            Command::UpdateTeam {
                team_id,
                name,
                budget,
            } => self.update_team(team_id, &name, budget),
            Command::DeleteTeam { team_id } => self.delete_team(team_id),
            Command::GetState => self.get_state(),
        }
    }

    // -- Lot lifecycle ------------------------------------------------------

    fn send_to_block(&mut self, player_id: i64, force: bool) -> Result<Outcome, AuctionError> {
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        if player.status == PlayerStatus::Sold {
            return Err(AuctionError::PlayerAlreadySold);
        }
        // An open lot with bids is not silently discarded; the admin must
        // resolve it or override explicitly.
        if self.lot.is_open() && self.lot.has_bids() && !force {
            return Err(AuctionError::LotAlreadyOpen);
        }

        let mut lot = self.lot.clone();
        lot.open_for(player.id, player.base_price);
        self.persist_lot(&lot)?;
        self.lot = lot;

        info!(player = %player.name, base_price = player.base_price, "player sent to block");
        Ok(Outcome::Broadcast(ServerMessage::NewPlayer(
            self.lot_snapshot()?,
        )))
    }

    fn place_bid(&mut self, team_id: i64, amount: u64) -> Result<Outcome, AuctionError> {
        if self.lot.status != LotStatus::Running {
            return Err(AuctionError::NotRunning);
        }
        let team = self.db.team(team_id)?.ok_or(AuctionError::TeamNotFound)?;
        let player_id = self
            .lot
            .current_player
            .ok_or(AuctionError::NoActivePlayer)?;
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::NoActivePlayer)?;

        // The opening bid claims the base price exactly; after that, any
        // amount strictly above the current bid is valid.
        let is_first_bid =
            self.lot.current_bid == player.base_price && self.lot.high_bidder.is_none();
        if !is_first_bid && amount <= self.lot.current_bid {
            return Err(AuctionError::BidTooLow {
                current: self.lot.current_bid,
            });
        }
        if is_first_bid && amount != player.base_price {
            return Err(AuctionError::InvalidOpeningBid {
                base: player.base_price,
            });
        }
        if amount > team.budget {
            return Err(AuctionError::InsufficientBudget);
        }
        if team.roster.len() >= self.roster_limit {
            return Err(AuctionError::RosterFull);
        }
        if self.lot.has_passed(team_id) {
            return Err(AuctionError::TeamHasPassed);
        }

        let mut lot = self.lot.clone();
        lot.current_bid = amount;
        lot.high_bidder = Some(team_id);
        lot.bid_history.push(BidRecord {
            team_id,
            amount,
            at: Utc::now(),
        });
        self.persist_lot(&lot)?;
        self.lot = lot;

        info!(team = %team.name, amount, "bid accepted");
        Ok(Outcome::Broadcast(ServerMessage::BidUpdate(
            self.lot_snapshot()?,
        )))
    }

    fn pass(&mut self, team_id: i64) -> Result<Outcome, AuctionError> {
        if !self.lot.is_open() {
            return Err(AuctionError::NoActivePlayer);
        }
        let team = self.db.team(team_id)?.ok_or(AuctionError::TeamNotFound)?;
        if self.lot.high_bidder == Some(team_id) {
            return Err(AuctionError::HighBidderCannotPass);
        }

        if !self.lot.has_passed(team_id) {
            let mut lot = self.lot.clone();
            lot.passed_teams.push(team_id);
            self.persist_lot(&lot)?;
            self.lot = lot;
            info!(team = %team.name, "team passed on current player");
        }
        // A repeated pass is accepted but non-mutating.
        Ok(Outcome::Broadcast(ServerMessage::PassUpdate(
            self.lot_snapshot()?,
        )))
    }

    fn finalize_bid(&mut self) -> Result<Outcome, AuctionError> {
        let (player_id, team_id) = match (self.lot.current_player, self.lot.high_bidder) {
            (Some(p), Some(t)) => (p, t),
            _ => return Err(AuctionError::NoActiveBid),
        };
        let sold_price = self.lot.current_bid;

        let action = LastAction {
            kind: LastActionKind::Sold,
            player_id,
            team_id: Some(team_id),
            amount: Some(sold_price),
            at: Utc::now(),
        };
        let mut lot = self.lot.clone();
        lot.resolve(action.clone());

        // Player sale, budget debit, and lot snapshot commit together.
        let lot_json = serde_json::to_value(&lot).map_err(anyhow::Error::from)?;
        self.db.apply_sale(player_id, team_id, sold_price, &lot_json)?;
        self.lot = lot;

        let player = self
            .db
            .player(player_id)?
            .ok_or_else(|| anyhow::anyhow!("sold player {player_id} missing from ledger"))?;
        let team = self
            .db
            .team(team_id)?
            .ok_or_else(|| anyhow::anyhow!("buying team {team_id} missing from ledger"))?;
        info!(player = %player.name, team = %team.name, sold_price, "lot finalized");

        Ok(Outcome::Broadcast(ServerMessage::PlayerSold {
            player,
            team,
            sold_price,
            teams: self.db.teams()?,
            players: self.db.players()?,
            last_action: action,
        }))
    }

    fn mark_unsold(&mut self) -> Result<Outcome, AuctionError> {
        let player_id = self
            .lot
            .current_player
            .ok_or(AuctionError::NoActivePlayer)?;
        if self.lot.has_bids() {
            return Err(AuctionError::CannotMarkUnsoldWithBids);
        }

        let action = LastAction {
            kind: LastActionKind::Unsold,
            player_id,
            team_id: None,
            amount: None,
            at: Utc::now(),
        };
        let mut lot = self.lot.clone();
        lot.resolve(action.clone());

        let lot_json = serde_json::to_value(&lot).map_err(anyhow::Error::from)?;
        self.db.apply_unsold(player_id, &lot_json)?;
        self.lot = lot;

        let player = self
            .db
            .player(player_id)?
            .ok_or_else(|| anyhow::anyhow!("unsold player {player_id} missing from ledger"))?;
        info!(player = %player.name, "player marked unsold");

        Ok(Outcome::Broadcast(ServerMessage::PlayerUnsold {
            player,
            players: self.db.players()?,
            last_action: action,
        }))
    }

    fn relist_player(&mut self, player_id: i64) -> Result<Outcome, AuctionError> {
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        if player.status != PlayerStatus::Unsold {
            return Err(AuctionError::PlayerNotUnsold);
        }

        self.db
            .set_player_status(player_id, PlayerStatus::Upcoming)?;
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        info!(player = %player.name, "player relisted");

        Ok(Outcome::Broadcast(ServerMessage::PlayerRelisted {
            player,
            players: self.db.players()?,
        }))
    }

    // -- Player CRUD --------------------------------------------------------

    fn create_player(
        &mut self,
        name: &str,
        positions: &[String],
        base_price: u64,
    ) -> Result<Outcome, AuctionError> {
        if base_price == 0 {
            return Err(AuctionError::InvalidBasePrice);
        }
        let id = self.db.create_player(name, positions, base_price)?;
        let player = self.db.player(id)?.ok_or(AuctionError::PlayerNotFound)?;
        Ok(Outcome::Broadcast(ServerMessage::PlayerCreated {
            player,
            players: self.db.players()?,
        }))
    }

    fn update_player(
        &mut self,
        player_id: i64,
        name: &str,
        positions: &[String],
        base_price: u64,
    ) -> Result<Outcome, AuctionError> {
        let _ = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        if self.lot.current_player == Some(player_id) {
            return Err(AuctionError::PlayerOnBlock);
        }
        if base_price == 0 {
            return Err(AuctionError::InvalidBasePrice);
        }

        self.db.update_player(player_id, name, positions, base_price)?;
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        Ok(Outcome::Broadcast(ServerMessage::PlayerUpdated {
            player,
            players: self.db.players()?,
        }))
    }

    fn delete_player(&mut self, player_id: i64) -> Result<Outcome, AuctionError> {
        let player = self
            .db
            .player(player_id)?
            .ok_or(AuctionError::PlayerNotFound)?;
        if player.status == PlayerStatus::Sold {
            return Err(AuctionError::CannotDeleteSold);
        }
        if self.lot.current_player == Some(player_id) {
            return Err(AuctionError::PlayerOnBlock);
        }

        self.db.delete_player(player_id)?;
        Ok(Outcome::Broadcast(ServerMessage::PlayerDeleted {
            player_id,
            players: self.db.players()?,
        }))
    }

    // -- Team CRUD ----------------------------------------------------------

    fn create_team(
        &mut self,
        name: &str,
        budget: u64,
        owner: &str,
        token: &str,
    ) -> Result<Outcome, AuctionError> {
        if self.db.team_by_name(name)?.is_some() {
            return Err(AuctionError::TeamNameTaken);
        }
        let id = self.db.create_team_with_owner(name, owner, token, budget)?;
        let team = self.db.team(id)?.ok_or(AuctionError::TeamNotFound)?;
        info!(team = %team.name, owner, "team created");
        Ok(Outcome::Broadcast(ServerMessage::TeamCreated {
            team,
            teams: self.db.teams()?,
        }))
    }

    fn update_team(
        &mut self,
        team_id: i64,
        name: &str,
        budget: u64,
    ) -> Result<Outcome, AuctionError> {
        let team = self.db.team(team_id)?.ok_or(AuctionError::TeamNotFound)?;
        // Editing the leading team mid-lot could push its budget below the
        // standing bid.
        if self.lot.is_open() && self.lot.high_bidder == Some(team_id) {
            return Err(AuctionError::TeamOnBlock);
        }
        if name != team.name && self.db.team_by_name(name)?.is_some() {
            return Err(AuctionError::TeamNameTaken);
        }

        self.db.update_team(team_id, name, budget)?;
        let team = self.db.team(team_id)?.ok_or(AuctionError::TeamNotFound)?;
        Ok(Outcome::Broadcast(ServerMessage::TeamUpdated {
            team,
            teams: self.db.teams()?,
        }))
    }

    fn delete_team(&mut self, team_id: i64) -> Result<Outcome, AuctionError> {
        let _ = self.db.team(team_id)?.ok_or(AuctionError::TeamNotFound)?;
        if self.lot.is_open() && self.lot.high_bidder == Some(team_id) {
            return Err(AuctionError::TeamOnBlock);
        }

        self.db.delete_team(team_id)?;
        Ok(Outcome::Broadcast(ServerMessage::TeamDeleted {
            team_id,
            teams: self.db.teams()?,
        }))
    }

    // -- Snapshots ----------------------------------------------------------

    fn get_state(&self) -> Result<Outcome, AuctionError> {
        Ok(Outcome::Reply(ServerMessage::State(StateSnapshot {
            auction_state: self.lot_snapshot()?,
            teams: self.db.teams()?,
            players: self.db.players()?,
        })))
    }

    /// Resolve the lot's references into full records for the wire.
    fn lot_snapshot(&self) -> Result<LotSnapshot, AuctionError> {
        let current_player = match self.lot.current_player {
            Some(id) => self.db.player(id)?,
            None => None,
        };
        let high_bidder = match self.lot.high_bidder {
            Some(id) => self.db.team(id)?,
            None => None,
        };
        let mut passed_teams = Vec::with_capacity(self.lot.passed_teams.len());
        for &id in &self.lot.passed_teams {
            if let Some(team) = self.db.team(id)? {
                passed_teams.push(team);
            }
        }
        Ok(LotSnapshot {
            status: self.lot.status,
            current_player,
            current_bid: self.lot.current_bid,
            high_bidder,
            passed_teams,
            bid_history: self.lot.bid_history.clone(),
            last_action: self.lot.last_action.clone(),
        })
    }

    fn persist_lot(&self, lot: &AuctionLot) -> Result<(), AuctionError> {
        let value = serde_json::to_value(lot).map_err(anyhow::Error::from)?;
        self.db.save_state(LOT_STATE_KEY, &value)?;
        Ok(())
    }
}

/// Role gate for every command, in one place. Owners may only bid or pass as
/// their own team; everything under admin:* needs the admin capability;
/// snapshots are open to spectators.
fn authorize(session: &Session, command: &Command) -> Result<(), AuctionError> {
    match command {
        Command::GetState => Ok(()),
        Command::PlaceBid { team_id, .. } | Command::Pass { team_id } => match session.role {
            Role::Admin => Ok(()),
            Role::Owner { team_id: own } if own == *team_id => Ok(()),
            _ => Err(AuctionError::NotAuthorized),
        },
        _ => match session.role {
            Role::Admin => Ok(()),
            _ => Err(AuctionError::NotAuthorized),
        },
    }
}
