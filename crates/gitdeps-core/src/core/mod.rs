pub mod config;
pub mod error;
pub(crate) mod filter;
pub(crate) mod fs;
pub(crate) mod net;
pub mod store;
pub mod sync;
pub mod tooling;
