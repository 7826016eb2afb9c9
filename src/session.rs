// Identity gateway: resolves a connection to a role and bound team.
//
// A connection starts as a spectator (read-only). An `auth:identify` message
// presents a bearer token; the credential store maps it to admin or to the
// owner of a specific team. Token provisioning and hashing live outside this
// system.

use crate::auction::error::AuctionError;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Owner { team_id: i64 },
    Spectator,
}

/// What a connection is allowed to do. Cloned into every engine request so
/// the dispatch entry point can authorize without touching the store.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: Option<String>,
    pub role: Role,
}

impl Session {
    pub fn spectator() -> Self {
        Session {
            username: None,
            role: Role::Spectator,
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self.role {
            Role::Admin => "admin",
            Role::Owner { .. } => "owner",
            Role::Spectator => "spectator",
        }
    }

    pub fn team_id(&self) -> Option<i64> {
        match self.role {
            Role::Owner { team_id } => Some(team_id),
            _ => None,
        }
    }
}

/// Resolve a bearer token against the credential store. An owner credential
/// without a bound team cannot act and is treated as invalid.
pub fn authenticate(db: &Database, token: &str) -> Result<Session, AuctionError> {
    let user = db.user_by_token(token)?.ok_or(AuctionError::InvalidToken)?;
    let role = match user.role.as_str() {
        "admin" => Role::Admin,
        "owner" => match user.team_id {
            Some(team_id) => Role::Owner { team_id },
            None => return Err(AuctionError::InvalidToken),
        },
        _ => return Err(AuctionError::InvalidToken),
    };
    Ok(Session {
        username: Some(user.username),
        role,
    })
}
