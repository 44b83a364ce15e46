//! Account management
//!
//! Binds a user to a chain address and keeps the cached balance healed from
//! the chain.

pub mod service;

pub use service::AccountService;
