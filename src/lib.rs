pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod failures;
pub mod fetch;
pub mod keys;
pub mod mapping;
pub mod orchestrator;
pub mod pipeline;
pub mod propagate;
pub mod proxy;
pub mod repair;
pub mod store;
pub mod telemetry;
pub mod verify;

pub mod util {
    pub mod env;
    pub mod fs;
}

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{FetchError, Result, SyncError, UploadError};
