pub mod attendance;
pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod export;
pub mod hr_feed;
pub mod ingest;
pub mod logging;
pub mod oauth;
pub mod push;
pub mod reconcile;
pub mod remote_store;
pub mod retry;
pub mod run_lock;
