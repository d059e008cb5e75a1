pub mod config;
pub mod error;
pub mod database;
pub mod auth;
pub mod users;
pub mod groups;
pub mod messages;
pub mod watchlist;
pub mod feed;
pub mod redis_relay;
pub mod connection;
pub mod websocket;
