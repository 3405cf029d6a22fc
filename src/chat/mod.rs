//! Chat module for Parlor.
//!
//! This module provides the real-time room:
//! - Presence tracking across multiple connections per identity
//! - Mutes, bans and address bans guarded by admin tiers
//! - Room messages with a capped in-memory ring
//! - Private messages with admin monitoring
//! - Slash commands (/mute, /ban, /prm, /omi, ...)

pub mod bus;
pub mod command;
pub mod fortune;
pub mod hub;
pub mod ledger;
pub mod lifecycle;
pub mod message;
pub mod private;
pub mod registry;
pub mod tier;

pub use bus::{BroadcastBus, ConnId, Outbound};
pub use command::{CommandResult, COMMANDS};
pub use hub::{Actor, ChatHub, LoginRequest};
pub use ledger::{IpTarget, ModerationLedger, MuteStatus};
pub use message::{ChatMessage, MessageRing, PrivateMessage};
pub use registry::SessionRegistry;
pub use tier::AdminTier;
