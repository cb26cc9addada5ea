pub mod client;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod measure;
pub mod progress;
pub mod runner;
pub mod types;
