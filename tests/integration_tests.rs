// Integration tests for the auction server.
//
// These exercise the full path a WebSocket frame takes: JSON text into the
// connection dispatcher, through the application loop and engine, out as a
// broadcast fact or a unicast reply. No TCP; the dispatcher and loop are
// driven directly over their channels.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use gavelcast::app;
use gavelcast::auction::engine::AuctionEngine;
use gavelcast::auction::state::AuctionLot;
use gavelcast::db::{Database, PlayerStatus};
use gavelcast::protocol::ServerMessage;
use gavelcast::server::{handle_text, Gateway};
use gavelcast::session::Session;

// ===========================================================================
// Test helpers
// ===========================================================================

struct TestServer {
    gateway: Gateway,
    db: Arc<Database>,
    team1: i64,
    team2: i64,
    player: i64,
}

/// One admin, two owner-backed teams with 1,000-unit budgets, one upcoming
/// player at base 500, and a running application loop.
fn start_server() -> (TestServer, broadcast::Receiver<ServerMessage>) {
    let db = Arc::new(Database::open(":memory:").unwrap());
    db.create_user("admin", "tok-admin", "admin", None).unwrap();
    let team1 = db
        .create_team_with_owner("Strikers", "owner1", "tok-1", 1_000)
        .unwrap();
    let team2 = db
        .create_team_with_owner("Rovers", "owner2", "tok-2", 1_000)
        .unwrap();
    let player = db.create_player("Ada Verne", &["ST".into()], 500).unwrap();

    let engine = AuctionEngine::new(db.clone(), AuctionLot::default(), 8);
    let (engine_tx, engine_rx) = mpsc::channel(64);
    let (broadcast_tx, events) = broadcast::channel(64);
    tokio::spawn(app::run(engine, engine_rx, broadcast_tx.clone()));

    let server = TestServer {
        gateway: Gateway {
            db: db.clone(),
            engine_tx,
            broadcast_tx,
        },
        db,
        team1,
        team2,
        player,
    };
    (server, events)
}

/// A connected client: its session and its unicast reply channel.
struct Client {
    session: Session,
    reply_tx: mpsc::Sender<ServerMessage>,
    reply_rx: mpsc::Receiver<ServerMessage>,
}

impl Client {
    fn connect() -> Self {
        let (reply_tx, reply_rx) = mpsc::channel(16);
        Client {
            session: Session::spectator(),
            reply_tx,
            reply_rx,
        }
    }

    async fn identify(&mut self, server: &TestServer, token: &str) {
        let text = format!(r#"{{"event":"auth:identify","token":"{token}"}}"#);
        self.send(server, &text).await;
        match self.reply_rx.recv().await.unwrap() {
            ServerMessage::AuthOk { .. } => {}
            other => panic!("identify failed: {other:?}"),
        }
    }

    async fn send(&mut self, server: &TestServer, text: &str) {
        handle_text(&server.gateway, &mut self.session, text, &self.reply_tx)
            .await
            .unwrap();
    }

    /// Send and expect an `auction:error` unicast back.
    async fn send_expect_error(&mut self, server: &TestServer, text: &str) -> String {
        self.send(server, text).await;
        match self.reply_rx.recv().await.unwrap() {
            ServerMessage::Error { message } => message,
            other => panic!("expected auction:error, got {other:?}"),
        }
    }
}

async fn event_name(events: &mut broadcast::Receiver<ServerMessage>) -> &'static str {
    events.recv().await.unwrap().event_name()
}

// ===========================================================================
// Bidding rounds
// ===========================================================================

#[tokio::test]
async fn full_bidding_round_sells_to_highest_bidder() {
    let (server, mut events) = start_server();
    let mut admin = Client::connect();
    let mut owner1 = Client::connect();
    let mut owner2 = Client::connect();
    admin.identify(&server, "tok-admin").await;
    owner1.identify(&server, "tok-1").await;
    owner2.identify(&server, "tok-2").await;

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    assert_eq!(event_name(&mut events).await, "auction:newPlayer");

    // Opening bid at base price.
    owner1
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;
    assert_eq!(event_name(&mut events).await, "auction:bidUpdate");

    // Equal bid is rejected with the current bid in the message.
    let message = owner2
        .send_expect_error(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team2),
        )
        .await;
    assert_eq!(message, "bid must be higher than the current bid of 500");

    owner2
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":600}}"#, server.team2),
        )
        .await;
    assert_eq!(event_name(&mut events).await, "auction:bidUpdate");

    admin.send(&server, r#"{"event":"admin:finalizeBid"}"#).await;
    match events.recv().await.unwrap() {
        ServerMessage::PlayerSold {
            player,
            team,
            sold_price,
            teams,
            ..
        } => {
            assert_eq!(player.id, server.player);
            assert_eq!(player.status, PlayerStatus::Sold);
            assert_eq!(team.id, server.team2);
            assert_eq!(sold_price, 600);
            let winner = teams.iter().find(|t| t.id == server.team2).unwrap();
            assert_eq!(winner.budget, 400);
            assert_eq!(winner.roster, vec![server.player]);
        }
        other => panic!("expected auction:playerSold, got {other:?}"),
    }
}

#[tokio::test]
async fn unsold_relist_reauction_round_trip() {
    let (server, mut events) = start_server();
    let mut admin = Client::connect();
    admin.identify(&server, "tok-admin").await;

    let block = format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player);
    admin.send(&server, &block).await;
    assert_eq!(event_name(&mut events).await, "auction:newPlayer");

    admin.send(&server, r#"{"event":"admin:markUnsold"}"#).await;
    assert_eq!(event_name(&mut events).await, "auction:playerUnsold");
    assert_eq!(
        server.db.player(server.player).unwrap().unwrap().status,
        PlayerStatus::Unsold
    );

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:relistPlayer","playerId":{}}}"#, server.player),
        )
        .await;
    assert_eq!(event_name(&mut events).await, "auction:playerRelisted");

    admin.send(&server, &block).await;
    match events.recv().await.unwrap() {
        ServerMessage::NewPlayer(lot) => {
            assert_eq!(lot.current_player.unwrap().id, server.player);
            assert_eq!(lot.current_bid, 500);
        }
        other => panic!("expected auction:newPlayer, got {other:?}"),
    }
}

#[tokio::test]
async fn mark_unsold_with_standing_bid_is_rejected() {
    let (server, mut events) = start_server();
    let mut admin = Client::connect();
    let mut owner1 = Client::connect();
    admin.identify(&server, "tok-admin").await;
    owner1.identify(&server, "tok-1").await;

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    owner1
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;

    let message = admin
        .send_expect_error(&server, r#"{"event":"admin:markUnsold"}"#)
        .await;
    assert!(message.contains("cannot mark player as unsold"));

    // Only the open and bid reached the shared feed.
    assert_eq!(event_name(&mut events).await, "auction:newPlayer");
    assert_eq!(event_name(&mut events).await, "auction:bidUpdate");
    assert!(events.try_recv().is_err());
}

// ===========================================================================
// Lot replacement
// ===========================================================================

#[tokio::test]
async fn replacing_a_contested_lot_requires_force() {
    let (server, mut events) = start_server();
    let second = server
        .db
        .create_player("Brix Calder", &["GK".into()], 300)
        .unwrap();
    let mut admin = Client::connect();
    let mut owner1 = Client::connect();
    admin.identify(&server, "tok-admin").await;
    owner1.identify(&server, "tok-1").await;

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    owner1
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;

    let message = admin
        .send_expect_error(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{second}}}"#),
        )
        .await;
    assert!(message.contains("already open"));

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{second},"force":true}}"#),
        )
        .await;

    assert_eq!(event_name(&mut events).await, "auction:newPlayer");
    assert_eq!(event_name(&mut events).await, "auction:bidUpdate");
    match events.recv().await.unwrap() {
        ServerMessage::NewPlayer(lot) => {
            assert_eq!(lot.current_player.unwrap().id, second);
            assert!(lot.bid_history.is_empty());
        }
        other => panic!("expected auction:newPlayer, got {other:?}"),
    }
}

// ===========================================================================
// Roles
// ===========================================================================

#[tokio::test]
async fn owner_cannot_run_admin_commands_or_bid_for_others() {
    let (server, _events) = start_server();
    let mut owner1 = Client::connect();
    owner1.identify(&server, "tok-1").await;

    let message = owner1
        .send_expect_error(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    assert_eq!(message, "not authorized");

    let message = owner1
        .send_expect_error(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team2),
        )
        .await;
    assert_eq!(message, "not authorized");
}

#[tokio::test]
async fn spectator_reads_state_but_cannot_act() {
    let (server, _events) = start_server();
    let mut spectator = Client::connect();

    spectator
        .send(&server, r#"{"event":"auction:getState"}"#)
        .await;
    match spectator.reply_rx.recv().await.unwrap() {
        ServerMessage::State(snapshot) => {
            assert_eq!(snapshot.teams.len(), 2);
            assert_eq!(snapshot.players.len(), 1);
            assert!(snapshot.auction_state.current_player.is_none());
        }
        other => panic!("expected auction:state, got {other:?}"),
    }

    let message = spectator
        .send_expect_error(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;
    assert_eq!(message, "not authorized");
}

// ===========================================================================
// Broadcast consistency
// ===========================================================================

#[tokio::test]
async fn all_subscribers_see_the_same_commit_order() {
    let (server, mut feed_a) = start_server();
    let mut feed_b = server.gateway.broadcast_tx.subscribe();

    let mut admin = Client::connect();
    let mut owner1 = Client::connect();
    admin.identify(&server, "tok-admin").await;
    owner1.identify(&server, "tok-1").await;

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    owner1
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;
    admin.send(&server, r#"{"event":"admin:finalizeBid"}"#).await;

    let expected = ["auction:newPlayer", "auction:bidUpdate", "auction:playerSold"];
    for name in expected {
        assert_eq!(event_name(&mut feed_a).await, name);
    }
    for name in expected {
        assert_eq!(event_name(&mut feed_b).await, name);
    }
}

// ===========================================================================
// Recovery
// ===========================================================================

#[tokio::test]
async fn open_lot_survives_a_restart() {
    let (server, mut events) = start_server();
    let mut admin = Client::connect();
    let mut owner1 = Client::connect();
    admin.identify(&server, "tok-admin").await;
    owner1.identify(&server, "tok-1").await;

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:sendToBlock","playerId":{}}}"#, server.player),
        )
        .await;
    owner1
        .send(
            &server,
            &format!(r#"{{"event":"user:placeBid","teamId":{},"amount":500}}"#, server.team1),
        )
        .await;
    assert_eq!(event_name(&mut events).await, "auction:newPlayer");
    assert_eq!(event_name(&mut events).await, "auction:bidUpdate");

    // "Restart": a new engine over the same store picks up the lot.
    let recovered = AuctionEngine::recover(server.db.clone(), 8).unwrap();
    let lot = recovered.lot();
    assert_eq!(lot.current_player, Some(server.player));
    assert_eq!(lot.current_bid, 500);
    assert_eq!(lot.high_bidder, Some(server.team1));
    assert_eq!(lot.bid_history.len(), 1);
}

#[tokio::test]
async fn team_management_round_trip() {
    let (server, mut events) = start_server();
    let mut admin = Client::connect();
    admin.identify(&server, "tok-admin").await;

    admin
        .send(
            &server,
            r#"{"event":"admin:createTeam","name":"Wanderers","budget":2000,"owner":"owner3","token":"tok-3"}"#,
        )
        .await;
    let created = match events.recv().await.unwrap() {
        ServerMessage::TeamCreated { team, teams } => {
            assert_eq!(teams.len(), 3);
            team
        }
        other => panic!("expected auction:teamCreated, got {other:?}"),
    };

    // The provisioned credential works immediately.
    let mut owner3 = Client::connect();
    owner3.identify(&server, "tok-3").await;
    assert_eq!(owner3.session.team_id(), Some(created.id));

    admin
        .send(
            &server,
            &format!(
                r#"{{"event":"admin:updateTeam","teamId":{},"name":"Wanderers","budget":2500}}"#,
                created.id
            ),
        )
        .await;
    match events.recv().await.unwrap() {
        ServerMessage::TeamUpdated { team, .. } => assert_eq!(team.budget, 2_500),
        other => panic!("expected auction:teamUpdated, got {other:?}"),
    }

    admin
        .send(
            &server,
            &format!(r#"{{"event":"admin:deleteTeam","teamId":{}}}"#, created.id),
        )
        .await;
    match events.recv().await.unwrap() {
        ServerMessage::TeamDeleted { team_id, teams } => {
            assert_eq!(team_id, created.id);
            assert_eq!(teams.len(), 2);
        }
        other => panic!("expected auction:teamDeleted, got {other:?}"),
    }

    // The credential dies with the team.
    assert!(server.db.user_by_token("tok-3").unwrap().is_none());
}
