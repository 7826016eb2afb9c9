// Wire protocol: the messages clients send and the facts the server emits.
//
// Messages are JSON objects discriminated by an `event` field, with payload
// fields alongside it (e.g. {"event":"user:placeBid","teamId":2,"amount":600}).
// Event names are namespaced by who may send them: admin:, user:, auction:.

use serde::{Deserialize, Serialize};

use crate::auction::state::{BidRecord, LastAction, LotStatus};
use crate::db::{Player, Team};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Present a bearer token; answered with `auth:ok` or `auction:error`.
    #[serde(rename = "auth:identify")]
    Identify { token: String },

    #[serde(rename = "auction:getState")]
    GetState {},

    #[serde(rename = "admin:sendToBlock")]
    SendToBlock {
        player_id: i64,
        /// Override an open lot that already has bids.
        #[serde(default)]
        force: bool,
    },

    #[serde(rename = "user:placeBid")]
    PlaceBid { team_id: i64, amount: u64 },

    #[serde(rename = "user:pass")]
    Pass { team_id: i64 },

    #[serde(rename = "admin:finalizeBid")]
    FinalizeBid {},

    #[serde(rename = "admin:markUnsold")]
    MarkUnsold {},

    #[serde(rename = "admin:relistPlayer")]
    RelistPlayer { player_id: i64 },

    #[serde(rename = "admin:createPlayer")]
    CreatePlayer {
        name: String,
        positions: Vec<String>,
        base_price: u64,
    },

    #[serde(rename = "admin:updatePlayer")]
    UpdatePlayer {
        player_id: i64,
        name: String,
        positions: Vec<String>,
        base_price: u64,
    },

    #[serde(rename = "admin:deletePlayer")]
    DeletePlayer { player_id: i64 },

    #[serde(rename = "admin:createTeam")]
    CreateTeam {
        name: String,
        budget: u64,
        /// Username for the owner credential created with the team.
        owner: String,
        /// Bearer token for that credential.
        token: String,
    },

    #[serde(rename = "admin:updateTeam")]
    UpdateTeam {
        team_id: i64,
        name: String,
        budget: u64,
    },

    #[serde(rename = "admin:deleteTeam")]
    DeleteTeam { team_id: i64 },
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// The lot with its references resolved to full records, the form every
/// participant renders from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSnapshot {
    pub status: LotStatus,
    pub current_player: Option<Player>,
    pub current_bid: u64,
    pub high_bidder: Option<Team>,
    pub passed_teams: Vec<Team>,
    pub bid_history: Vec<BidRecord>,
    pub last_action: Option<LastAction>,
}

/// Full state for late joiners: the lot plus both ledger collections,
/// consistent with the latest committed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub auction_state: LotSnapshot,
    pub teams: Vec<Team>,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "auth:ok")]
    AuthOk {
        role: String,
        team_id: Option<i64>,
    },

    /// Unicast reply to `auction:getState`.
    #[serde(rename = "auction:state")]
    State(StateSnapshot),

    #[serde(rename = "auction:newPlayer")]
    NewPlayer(LotSnapshot),

    #[serde(rename = "auction:bidUpdate")]
    BidUpdate(LotSnapshot),

    #[serde(rename = "auction:passUpdate")]
    PassUpdate(LotSnapshot),

    #[serde(rename = "auction:playerSold")]
    PlayerSold {
        player: Player,
        team: Team,
        sold_price: u64,
        teams: Vec<Team>,
        players: Vec<Player>,
        last_action: LastAction,
    },

    #[serde(rename = "auction:playerUnsold")]
    PlayerUnsold {
        player: Player,
        players: Vec<Player>,
        last_action: LastAction,
    },

    #[serde(rename = "auction:playerRelisted")]
    PlayerRelisted {
        player: Player,
        players: Vec<Player>,
    },

    #[serde(rename = "auction:playerCreated")]
    PlayerCreated {
        player: Player,
        players: Vec<Player>,
    },

    #[serde(rename = "auction:playerUpdated")]
    PlayerUpdated {
        player: Player,
        players: Vec<Player>,
    },

    #[serde(rename = "auction:playerDeleted")]
    PlayerDeleted {
        player_id: i64,
        players: Vec<Player>,
    },

    #[serde(rename = "auction:teamCreated")]
    TeamCreated { team: Team, teams: Vec<Team> },

    #[serde(rename = "auction:teamUpdated")]
    TeamUpdated { team: Team, teams: Vec<Team> },

    #[serde(rename = "auction:teamDeleted")]
    TeamDeleted { team_id: i64, teams: Vec<Team> },

    /// Unicast to the command's originator only; never broadcast.
    #[serde(rename = "auction:error")]
    Error { message: String },
}

impl ServerMessage {
    /// The wire event name, useful for logging and ordering assertions.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::AuthOk { .. } => "auth:ok",
            ServerMessage::State(_) => "auction:state",
            ServerMessage::NewPlayer(_) => "auction:newPlayer",
            ServerMessage::BidUpdate(_) => "auction:bidUpdate",
            ServerMessage::PassUpdate(_) => "auction:passUpdate",
            ServerMessage::PlayerSold { .. } => "auction:playerSold",
            ServerMessage::PlayerUnsold { .. } => "auction:playerUnsold",
            ServerMessage::PlayerRelisted { .. } => "auction:playerRelisted",
            ServerMessage::PlayerCreated { .. } => "auction:playerCreated",
            ServerMessage::PlayerUpdated { .. } => "auction:playerUpdated",
            ServerMessage::PlayerDeleted { .. } => "auction:playerDeleted",
            ServerMessage::TeamCreated { .. } => "auction:teamCreated",
            ServerMessage::TeamUpdated { .. } => "auction:teamUpdated",
            ServerMessage::TeamDeleted { .. } => "auction:teamDeleted",
            ServerMessage::Error { .. } => "auction:error",
        }
    }
}
