//! Web module for Parlor.
//!
//! This module provides the WebSocket transport for the chat room and a
//! health check endpoint.

pub mod events;
pub mod server;
pub mod ws;

pub use events::{ClientEvent, ClientFrame, Reply, ServerEvent};
pub use server::{create_router, WebServer};
pub use ws::WsState;
