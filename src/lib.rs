pub mod checker;
pub mod config;
pub mod domain;
pub mod error;
pub mod mapper;
pub mod output;
pub mod progress;
pub mod providers;
pub mod resume;
pub mod retry;
pub mod store;
pub mod task;
pub mod transport;
pub mod uniprot;
pub mod usi;
