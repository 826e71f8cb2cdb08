pub mod delegate;
pub mod dependencies;
pub mod direct_downloader;
pub mod errors;
pub mod http_client;
pub mod hub_api;
pub mod jobs;
pub mod manager;
pub mod notify;
pub mod process;
pub mod progress;
pub mod strategy;
pub mod traits;
pub mod verify;
