// gavelcast: real-time sports-auction coordinator.
//
// A single shared auction proceeds through a sequence of players. Team owners
// submit competing bids over a WebSocket connection and an administrator
// drives the lot through its lifecycle (send-to-block, finalize, mark-unsold,
// relist). All state-changing commands funnel through one serialized engine.

pub mod app;
pub mod auction;
pub mod config;
pub mod db;
pub mod protocol;
pub mod seed;
pub mod server;
pub mod session;
