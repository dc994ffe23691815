//! HTTP surface of the help-request board: authentication, the request
//! lifecycle, search, and the live feeds.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod requests;
pub mod router;
pub mod state;
pub mod stream;
