// WebSocket server: accepts any number of clients and bridges them to the
// application loop.
//
// Each connection gets a reader task and a writer task. The reader parses
// client messages, handles `auth:identify` locally against the credential
// store, and forwards everything else to the application loop as an
// [`EngineRequest`]. The writer interleaves the shared broadcast feed with
// the connection's unicast replies onto the socket.

use std::sync::Arc;

use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::app::EngineRequest;
use crate::auction::engine::Command;
use crate::db::Database;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{self, Session};

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub engine_tx: mpsc::Sender<EngineRequest>,
    pub broadcast_tx: broadcast::Sender<ServerMessage>,
}

/// Unicast buffer per connection; a client this far behind on its own
/// replies is effectively gone.
const REPLY_BUFFER: usize = 64;

/// Run the WebSocket server on the given port, spawning a task pair per
/// accepted client. Runs until the listener fails or the task is cancelled.
pub async fn run(port: u16, gateway: Gateway) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr = addr.to_string();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {addr}: {e}");
                    return;
                }
            };
            info!("client connected from {addr}");

            let (sink, read) = ws_stream.split();
            let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER);
            let broadcast_rx = gateway.broadcast_tx.subscribe();

            let writer_addr = addr.clone();
            let writer = tokio::spawn(async move {
                pump_outgoing(sink, broadcast_rx, reply_rx, &writer_addr).await;
            });

            process_message_stream(read, &gateway, &reply_tx, &addr).await;

            // Dropping reply_tx ends the writer's unicast stream.
            drop(reply_tx);
            let _ = writer.await;
            info!("client {addr} disconnected");
        });
    }
}

/// Drive one client's incoming messages. Generic over the stream type so the
/// dispatch logic can be tested with in-memory streams without TCP.
pub async fn process_message_stream<St>(
    mut stream: St,
    gateway: &Gateway,
    reply_tx: &mpsc::Sender<ServerMessage>,
    addr: &str,
) where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    // Every connection starts unauthenticated and read-only.
    let mut session = Session::spectator();

    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if handle_text(gateway, &mut session, &text, reply_tx)
                    .await
                    .is_err()
                {
                    // Application loop or client gone; stop reading.
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
}

/// Parse and dispatch one text frame. `auth:identify` upgrades the session
/// in place; every other message becomes an engine request carrying a clone
/// of the current session. `Err(())` means a channel peer is gone.
pub async fn handle_text(
    gateway: &Gateway,
    session: &mut Session,
    text: &str,
    reply_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), ()> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparseable client message: {e}");
            return reply_tx
                .send(ServerMessage::Error {
                    message: "unrecognized message".to_string(),
                })
                .await
                .map_err(|_| ());
        }
    };

    if let ClientMessage::Identify { token } = message {
        let reply = match session::authenticate(&gateway.db, &token) {
            Ok(authenticated) => {
                info!(user = ?authenticated.username, role = authenticated.role_name(), "client identified");
                *session = authenticated;
                ServerMessage::AuthOk {
                    role: session.role_name().to_string(),
                    team_id: session.team_id(),
                }
            }
            Err(err) => ServerMessage::Error {
                message: err.to_string(),
            },
        };
        return reply_tx.send(reply).await.map_err(|_| ());
    }

    let command = command_for(message);
    gateway
        .engine_tx
        .send(EngineRequest {
            session: session.clone(),
            command,
            reply: reply_tx.clone(),
        })
        .await
        .map_err(|_| ())
}

/// Wire message to engine command. `Identify` is handled before this point.
fn command_for(message: ClientMessage) -> Command {
    match message {
        ClientMessage::Identify { .. } => unreachable!("identify is handled by the connection"),
        ClientMessage::GetState {} => Command::GetState,
        ClientMessage::SendToBlock { player_id, force } => {
            Command::SendToBlock { player_id, force }
        }
        ClientMessage::PlaceBid { team_id, amount } => Command::PlaceBid { team_id, amount },
        ClientMessage::Pass { team_id } => Command::Pass { team_id },
        ClientMessage::FinalizeBid {} => Command::FinalizeBid,
        ClientMessage::MarkUnsold {} => Command::MarkUnsold,
        ClientMessage::RelistPlayer { player_id } => Command::RelistPlayer { player_id },
        ClientMessage::CreatePlayer {
            name,
            positions,
            base_price,
        } => Command::CreatePlayer {
            name,
            positions,
            base_price,
        },
        ClientMessage::UpdatePlayer {
            player_id,
            name,
            positions,
            base_price,
        } => Command::UpdatePlayer {
            player_id,
            name,
            positions,
            base_price,
        },
        ClientMessage::DeletePlayer { player_id } => Command::DeletePlayer { player_id },
        ClientMessage::CreateTeam {
            name,
            budget,
            owner,
            token,
        } => Command::CreateTeam {
            name,
            budget,
            owner,
            token,
        },
        ClientMessage::UpdateTeam {
            team_id,
            name,
            budget,
        } => Command::UpdateTeam {
            team_id,
            name,
            budget,
        },
        ClientMessage::DeleteTeam { team_id } => Command::DeleteTeam { team_id },
    }
}

/// Writer half of a connection: merge the shared broadcast feed and this
/// connection's unicast replies onto the socket as JSON text frames.
async fn pump_outgoing<W>(
    mut sink: W,
    mut broadcast_rx: broadcast::Receiver<ServerMessage>,
    mut reply_rx: mpsc::Receiver<ServerMessage>,
    addr: &str,
) where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    loop {
        let message = tokio::select! {
            broadcasted = broadcast_rx.recv() => match broadcasted {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The client fell behind the shared feed; it should
                    // request a fresh snapshot.
                    warn!("client {addr} lagged, skipped {skipped} broadcasts");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            replied = reply_rx.recv() => match replied {
                Some(message) => message,
                None => break,
            },
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize {}: {e}", message.event_name());
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            warn!("write to {addr} failed: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use crate::app;
    use crate::auction::engine::AuctionEngine;
    use crate::auction::state::AuctionLot;

    struct Harness {
        gateway: Gateway,
        events: broadcast::Receiver<ServerMessage>,
        team: i64,
        player: i64,
    }

    /// In-memory store with one team, one player, admin and owner tokens,
    /// and a live application loop behind the gateway.
    fn harness() -> Harness {
        let db = Arc::new(Database::open(":memory:").unwrap());
        db.create_user("admin", "tok-admin", "admin", None).unwrap();
        let team = db
            .create_team_with_owner("Strikers", "owner1", "tok-owner", 1_000)
            .unwrap();
        let player = db.create_player("Ada Verne", &["ST".into()], 500).unwrap();

        let engine = AuctionEngine::new(db.clone(), AuctionLot::default(), 8);
        let (engine_tx, engine_rx) = mpsc::channel(64);
        let (broadcast_tx, events) = broadcast::channel(64);
        tokio::spawn(app::run(engine, engine_rx, broadcast_tx.clone()));

        Harness {
            gateway: Gateway {
                db,
                engine_tx,
                broadcast_tx,
            },
            events,
            team,
            player,
        }
    }

    async fn send(
        h: &Harness,
        session: &mut Session,
        text: &str,
        reply_tx: &mpsc::Sender<ServerMessage>,
    ) {
        handle_text(&h.gateway, session, text, reply_tx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn identify_upgrades_session_and_replies_auth_ok() {
        let h = harness();
        let mut session = Session::spectator();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        send(
            &h,
            &mut session,
            r#"{"event":"auth:identify","token":"tok-owner"}"#,
            &reply_tx,
        )
        .await;

        match reply_rx.recv().await.unwrap() {
            ServerMessage::AuthOk { role, team_id } => {
                assert_eq!(role, "owner");
                assert_eq!(team_id, Some(h.team));
            }
            other => panic!("expected auth:ok, got {other:?}"),
        }
        assert_eq!(session.role_name(), "owner");
    }

    #[tokio::test]
    async fn bad_token_leaves_session_spectator() {
        let h = harness();
        let mut session = Session::spectator();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        send(
            &h,
            &mut session,
            r#"{"event":"auth:identify","token":"nope"}"#,
            &reply_tx,
        )
        .await;

        assert!(matches!(
            reply_rx.recv().await.unwrap(),
            ServerMessage::Error { .. }
        ));
        assert_eq!(session.role_name(), "spectator");
    }

    #[tokio::test]
    async fn malformed_json_gets_error_reply() {
        let h = harness();
        let mut session = Session::spectator();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        send(&h, &mut session, "{not json", &reply_tx).await;

        match reply_rx.recv().await.unwrap() {
            ServerMessage::Error { message } => assert_eq!(message, "unrecognized message"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spectator_commands_are_rejected_by_the_loop() {
        let h = harness();
        let mut session = Session::spectator();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        let text = format!(
            r#"{{"event":"admin:sendToBlock","playerId":{}}}"#,
            h.player
        );
        send(&h, &mut session, &text, &reply_tx).await;

        match reply_rx.recv().await.unwrap() {
            ServerMessage::Error { message } => assert_eq!(message, "not authorized"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn admin_flow_reaches_the_broadcast_feed() {
        let mut h = harness();
        let mut session = Session::spectator();
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        send(
            &h,
            &mut session,
            r#"{"event":"auth:identify","token":"tok-admin"}"#,
            &reply_tx,
        )
        .await;
        let text = format!(
            r#"{{"event":"admin:sendToBlock","playerId":{}}}"#,
            h.player
        );
        send(&h, &mut session, &text, &reply_tx).await;
        let text = format!(
            r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#,
            h.team
        );
        send(&h, &mut session, &text, &reply_tx).await;

        assert_eq!(h.events.recv().await.unwrap().event_name(), "auction:newPlayer");
        assert_eq!(h.events.recv().await.unwrap().event_name(), "auction:bidUpdate");
    }

    #[tokio::test]
    async fn get_state_replies_on_the_unicast_channel() {
        let h = harness();
        let mut session = Session::spectator();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        send(
            &h,
            &mut session,
            r#"{"event":"auction:getState"}"#,
            &reply_tx,
        )
        .await;

        match reply_rx.recv().await.unwrap() {
            ServerMessage::State(snapshot) => {
                assert_eq!(snapshot.teams.len(), 1);
                assert_eq!(snapshot.players.len(), 1);
            }
            other => panic!("expected state reply, got {other:?}"),
        }
    }

    // -- stream-level behavior, with in-memory streams -----------------------

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let h = harness();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let messages = vec![
            Ok(Message::Text(r#"{"event":"auction:getState"}"#.into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"event":"auction:getState"}"#.into())),
        ];

        process_message_stream(mock_stream(messages), &h.gateway, &reply_tx, "test").await;

        assert!(matches!(
            reply_rx.recv().await.unwrap(),
            ServerMessage::State(_)
        ));
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_and_ping_frames_are_ignored() {
        let h = harness();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Text(r#"{"event":"auction:getState"}"#.into())),
        ];

        process_message_stream(mock_stream(messages), &h.gateway, &reply_tx, "test").await;

        assert!(matches!(
            reply_rx.recv().await.unwrap(),
            ServerMessage::State(_)
        ));
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ws_error_stops_processing() {
        let h = harness();
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let messages = vec![
            Err(WsError::ConnectionClosed),
            Ok(Message::Text(r#"{"event":"auction:getState"}"#.into())),
        ];

        process_message_stream(mock_stream(messages), &h.gateway, &reply_tx, "test").await;

        assert!(reply_rx.try_recv().is_err());
    }
}
