pub mod auth;
pub mod config;
pub mod context;
pub mod driver;
pub mod extractor;
pub mod locator;
pub mod navigator;
pub mod orchestrator;
pub mod parser;
pub mod persister;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Credentials, SiteProfile};
pub use driver::{ChromiumDriver, Driver, LaunchOptions};
pub use orchestrator::Orchestrator;
pub use store::{FileSessionBackend, SessionStore, SqliteStore};
