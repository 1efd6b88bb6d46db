//! File-backed key vault and local KMS provider for `CryptSchema`.
//!
//! Both are suitable for development, testing and single-host deployments:
//!
//! - [`FileKeyVault`] keeps each key vault namespace in one JSON file
//! - [`LocalKeyProvider`] wraps data keys under a 96-byte master key held in
//!   configuration or a key file

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod provider;
mod vault;

pub use provider::{load_master_key, LocalKeyProvider};
pub use vault::FileKeyVault;
