pub mod activity;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod strava_client;
pub mod sync;
pub mod uploader;
