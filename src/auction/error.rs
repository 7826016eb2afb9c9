// Typed rejections produced by the auction engine. Every command either
// completes or fails with one of these before any mutation happens; the
// message text is what the originating client sees on `auction:error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuctionError {
    // -- Bid validation ----------------------------------------------------
    #[error("auction is not running")]
    NotRunning,

    #[error("bid must be higher than the current bid of {current}")]
    BidTooLow { current: u64 },

    #[error("first bid must be exactly the base price of {base}")]
    InvalidOpeningBid { base: u64 },

    #[error("not enough budget")]
    InsufficientBudget,

    #[error("maximum roster size reached")]
    RosterFull,

    #[error("your team has passed on this player and cannot bid")]
    TeamHasPassed,

    #[error("the current high bidder cannot pass")]
    HighBidderCannotPass,

    // -- Lot lifecycle -----------------------------------------------------
    #[error("no active player")]
    NoActivePlayer,

    #[error("no active bid to finalize")]
    NoActiveBid,

    #[error("cannot mark player as unsold when there are active bids; use finalize instead")]
    CannotMarkUnsoldWithBids,

    #[error("a lot is already open with bids; resend with force to override")]
    LotAlreadyOpen,

    #[error("player is not unsold")]
    PlayerNotUnsold,

    #[error("player is already sold")]
    PlayerAlreadySold,

    // -- Ledger lookups and CRUD guards ------------------------------------
    #[error("player not found")]
    PlayerNotFound,

    #[error("team not found")]
    TeamNotFound,

    #[error("cannot delete a sold player")]
    CannotDeleteSold,

    #[error("player is currently on the block")]
    PlayerOnBlock,

    #[error("team is currently leading the lot on the block")]
    TeamOnBlock,

    #[error("team name is already taken")]
    TeamNameTaken,

    #[error("base price must be greater than zero")]
    InvalidBasePrice,

    // -- Identity ----------------------------------------------------------
    #[error("not authorized")]
    NotAuthorized,

    #[error("invalid credentials")]
    InvalidToken,

    // -- Store failures ----------------------------------------------------
    /// The ledger store failed. The lot is left unchanged; the originator
    /// sees only this generic message.
    #[error("internal storage error")]
    Persistence(#[from] anyhow::Error),
}
