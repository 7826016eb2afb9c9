// Auction lot: the single shared mutable record of the player on the block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall auction status. `Running` is entered on the first send-to-block
/// and deliberately persists across lot resolutions (it is not reset to
/// `Pending` when a player sells).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Pending,
    Running,
    Completed,
}

/// One accepted bid on the current lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub team_id: i64,
    pub amount: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastActionKind {
    Sold,
    Unsold,
}

/// The last terminal outcome (sold/unsold), retained for display continuity
/// until the next player is sent to the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAction {
    #[serde(rename = "type")]
    pub kind: LastActionKind,
    pub player_id: i64,
    pub team_id: Option<i64>,
    pub amount: Option<u64>,
    pub at: DateTime<Utc>,
}

/// The auction lot singleton. Exactly one instance exists system-wide; every
/// command serializes against it. `current_player` being set is what makes
/// the lot biddable. `passed_teams` and `bid_history` are scoped to the
/// current lot only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionLot {
    pub status: LotStatus,
    pub current_player: Option<i64>,
    pub current_bid: u64,
    pub high_bidder: Option<i64>,
    pub passed_teams: Vec<i64>,
    pub bid_history: Vec<BidRecord>,
    pub last_action: Option<LastAction>,
}

impl Default for AuctionLot {
    fn default() -> Self {
        AuctionLot {
            status: LotStatus::Pending,
            current_player: None,
            current_bid: 0,
            high_bidder: None,
            passed_teams: Vec::new(),
            bid_history: Vec::new(),
            last_action: None,
        }
    }
}

impl AuctionLot {
    /// Whether a lot is actively biddable.
    pub fn is_open(&self) -> bool {
        self.current_player.is_some()
    }

    /// Whether the current lot has received any bid.
    pub fn has_bids(&self) -> bool {
        self.high_bidder.is_some() || !self.bid_history.is_empty()
    }

    pub fn has_passed(&self, team_id: i64) -> bool {
        self.passed_teams.contains(&team_id)
    }

    /// Put a new player on the block: current bid starts at the base price,
    /// bids/passes from any previous lot are discarded, and the retained
    /// last action is cleared.
    pub fn open_for(&mut self, player_id: i64, base_price: u64) {
        self.current_player = Some(player_id);
        self.current_bid = base_price;
        self.high_bidder = None;
        self.passed_teams.clear();
        self.bid_history.clear();
        self.status = LotStatus::Running;
        self.last_action = None;
    }

    /// Resolve the lot (sold or unsold): record the outcome and reset the
    /// block to its empty defaults. Status stays as-is, ready for the next
    /// send-to-block.
    pub fn resolve(&mut self, action: LastAction) {
        self.current_player = None;
        self.current_bid = 0;
        self.high_bidder = None;
        self.passed_teams.clear();
        self.bid_history.clear();
        self.last_action = Some(action);
    }
}
