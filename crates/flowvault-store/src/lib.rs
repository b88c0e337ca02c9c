//! Flowvault production glue: durable storage and system environment.
//!
//! Provides the production implementations of the capability traits defined
//! in `flowvault-core`:
//!
//! - [`RedbStorage`]: the [`flowvault_core::Storage`] capability backed by
//!   Redb's ACID transactions with copy-on-write crash safety
//! - [`SystemEnv`]: the [`flowvault_core::Environment`] capability backed by
//!   OS cryptographic RNG and the system clock

#![forbid(unsafe_code)]

mod redb;
mod system_env;

pub use system_env::SystemEnv;

pub use self::redb::RedbStorage;
