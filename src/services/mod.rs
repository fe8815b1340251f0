//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the in-memory collections and the rules around them
//! so route handlers stay focused on protocol translation.

pub mod conversation;
pub mod presence;
pub mod registry;
pub mod router;
pub mod users;
