mod connection;
mod helpers;
mod migrations;
mod repositories;
mod sink;

pub use connection::Database;
pub use sink::SessionSink;
