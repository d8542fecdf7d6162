//! Credential collaborators for the Antigravity account pool
//!
//! Holds the pieces of a credential that the pool needs but does not own:
//! the refresh-parts codec, the bootstrap OAuth credential handed in by the
//! host, and a redacting wrapper for short-lived access tokens. Nothing here
//! talks to the network; token exchange and refresh happen elsewhere.
//!
//! Credential flow:
//! 1. Host supplies an `OAuthCredential` (or loads one via `load_credential`)
//! 2. `parse_refresh_parts()` splits its refresh string into `RefreshParts`
//! 3. The pool stores parts per account and matches the bootstrap by refresh token
//! 4. After a refresh, `format_refresh_parts()` rebuilds the opaque string

pub mod constants;
pub mod credentials;
pub mod error;
pub mod parts;

pub use constants::*;
pub use credentials::{AccessToken, OAuthCredential, load_credential};
pub use error::{Error, Result};
pub use parts::{RefreshParts, format_refresh_parts, parse_refresh_parts};
