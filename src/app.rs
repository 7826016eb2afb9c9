// The application loop: the single writer over the auction engine.
//
// Connection tasks never touch the engine directly. They queue an
// [`EngineRequest`] and the loop here applies commands one at a time, in
// arrival order. A command's broadcast is published before the next command
// is taken, so every subscriber observes facts in commit order.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::auction::engine::{AuctionEngine, Command, Outcome};
use crate::auction::error::AuctionError;
use crate::protocol::ServerMessage;
use crate::session::Session;

/// One command from one connection, with the session it authorized under and
/// a unicast channel for replies and rejections.
#[derive(Debug)]
pub struct EngineRequest {
    pub session: Session,
    pub command: Command,
    pub reply: mpsc::Sender<ServerMessage>,
}

/// Drain engine requests until every sender is gone. Broadcast sends are
/// allowed to fail (no subscribers is normal before the first connection);
/// unicast sends fail only when the originating connection is gone, which is
/// not this loop's problem.
pub async fn run(
    mut engine: AuctionEngine,
    mut requests: mpsc::Receiver<EngineRequest>,
    broadcast_tx: broadcast::Sender<ServerMessage>,
) -> anyhow::Result<()> {
    info!("application loop started");

    while let Some(request) = requests.recv().await {
        let EngineRequest {
            session,
            command,
            reply,
        } = request;
        debug!(user = ?session.username, role = session.role_name(), ?command, "applying command");

        match engine.apply(&session, command) {
            Ok(Outcome::Broadcast(message)) => {
                let _ = broadcast_tx.send(message);
            }
            Ok(Outcome::Reply(message)) => {
                let _ = reply.send(message).await;
            }
            Err(err) => {
                if let AuctionError::Persistence(ref cause) = err {
                    error!("storage failure while applying command: {cause:#}");
                }
                let _ = reply
                    .send(ServerMessage::Error {
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }

    info!("application loop stopped (all request senders dropped)");
    Ok(())
}
