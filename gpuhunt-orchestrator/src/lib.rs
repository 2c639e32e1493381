pub mod balance_job;
pub mod hunt;
pub mod logger;
pub mod monitor;
pub mod provider_manager;
pub mod settings;
pub mod shutdown;
pub mod state;
pub mod status_api;
pub mod terminator;
