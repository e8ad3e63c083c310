pub mod auth;
pub mod backup;
pub mod codec;
pub mod config;
pub mod db;
pub mod import;
pub mod ipc;
pub mod report;
pub mod store;
