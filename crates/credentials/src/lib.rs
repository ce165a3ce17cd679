//! Background bearer-token maintenance
//!
//! The `CredentialRefresher` logs in through a `SessionProvider`, then keeps
//! pulling a fresh token on a fixed interval. Readers only ever see the last
//! good token; a failed cycle is logged and retried on the next tick.

pub mod error;
pub mod refresher;
pub mod token;

pub use error::{Error, Result};
pub use refresher::{CredentialRefresher, RefresherConfig, RefresherState};
pub use token::TokenState;
