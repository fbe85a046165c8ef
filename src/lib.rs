pub mod admin;
pub mod audit;
pub mod auth;
pub mod authz;
pub mod config;
pub mod context;
pub mod db;
pub mod delivery;
pub mod error;
pub mod models;
pub mod outbox;
pub mod queries;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod workflow;
