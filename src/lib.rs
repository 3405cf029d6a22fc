//! Parlor - a real-time group chat server
//!
//! One shared room over WebSocket with multi-connection presence, two admin
//! tiers, mutes and bans, private messages and slash commands.

pub mod chat;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod store;
pub mod web;

pub use chat::{AdminTier, ChatHub, ChatMessage, CommandResult, LoginRequest, PrivateMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ParlorError, Result};
pub use store::{Account, ChatStore, MemoryStore, ProfileUpdate, StoreError};
pub use web::WebServer;
