//! WebSocket handler.
//!
//! Each socket gets a connection id on the hub and an outbound pump task that
//! serializes [`ServerEvent`]s. Inbound text frames are parsed into
//! [`ClientEvent`]s and routed to the hub one at a time, in arrival order.

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{FutureExt, SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::events::{ClientEvent, ClientFrame, Reply, ServerEvent};
use crate::chat::{ChatHub, ConnId, LoginRequest, Outbound};
use crate::{ParlorError, Result};

/// State shared by the WebSocket routes.
#[derive(Clone)]
pub struct WsState {
    /// The chat room.
    pub hub: Arc<ChatHub>,
    /// Take the client IP from `X-Forwarded-For`.
    pub trust_forwarded_for: bool,
}

impl WsState {
    /// Create a new state.
    pub fn new(hub: Arc<ChatHub>, trust_forwarded_for: bool) -> Self {
        Self {
            hub,
            trust_forwarded_for,
        }
    }
}

/// Extract the client IP.
///
/// The first `X-Forwarded-For` entry wins when the proxy is trusted;
/// otherwise the socket peer address is used.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// WebSocket upgrade handler.
///
/// GET /ws
///
/// Connections from a banned address are refused with 403.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, peer, state.trust_forwarded_for);

    match state.hub.is_ip_banned(&ip).await {
        Ok(false) => {}
        Ok(true) => {
            info!(ip = %ip, "Refused connection from banned address");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
        Err(e) => {
            warn!(ip = %ip, error = %e, "Address ban lookup failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
        }
    }

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, ip))
}

/// Drive one socket until either side closes it.
async fn handle_socket(socket: WebSocket, hub: Arc<ChatHub>, ip: String) {
    let (conn, mut outbound) = hub.open_connection(&ip);
    let (mut ws_sender, mut ws_receiver) = socket.split();
    debug!(conn, ip = %ip, "WebSocket session started");

    let mut pump = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Event(event) => match event.to_json() {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(conn, error = %e, "Failed to serialize event"),
                },
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&hub, conn, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut pump => break,
        }
    }

    hub.close_connection(conn);
    pump.abort();
    debug!(conn, "WebSocket session ended");
}

/// Parse, route and answer one inbound frame.
///
/// A panic inside the handler is logged and answered with a generic failure;
/// the socket stays open.
pub async fn handle_frame(hub: &ChatHub, conn: ConnId, text: &str) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err((ack, e)) => {
            debug!(conn, error = %e, "Failed to parse client event");
            respond(
                hub,
                conn,
                ack,
                Err(ParlorError::Validation("invalid event".to_string())),
            );
            return;
        }
    };

    let result = guarded(conn, route(hub, conn, frame.event)).await;
    respond(hub, conn, frame.ack, result);
}

/// Run a handler future, turning a panic into a generic failure.
async fn guarded<F>(conn: ConnId, handler: F) -> Result<Reply>
where
    F: Future<Output = Result<Reply>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            error!(conn, panic = %panic_message(panic.as_ref()), "Event handler panicked");
            Err(ParlorError::Internal("request failed".to_string()))
        }
    }
}

async fn route(hub: &ChatHub, conn: ConnId, event: ClientEvent) -> Result<Reply> {
    match event {
        ClientEvent::Signup { username, password } => {
            let account = hub.signup(&username, &password).await?;
            Ok(Reply {
                account: Some(account),
                ..Reply::ok()
            })
        }
        ClientEvent::Login {
            username,
            password,
            token,
            admin_password,
        } => {
            let account = hub
                .login(
                    conn,
                    LoginRequest {
                        username,
                        password,
                        token,
                        admin_password,
                    },
                )
                .await?;
            Ok(Reply {
                account: Some(account),
                ..Reply::ok()
            })
        }
        ClientEvent::Logout => {
            hub.logout(conn)?;
            Ok(Reply::ok())
        }
        ClientEvent::UpdateProfile(update) => {
            let account = hub.update_profile(conn, update).await?;
            Ok(Reply {
                account: Some(account),
                ..Reply::ok()
            })
        }
        ClientEvent::SendMessage { text, reply_to } => {
            let id = hub.send_message(conn, &text, reply_to).await?;
            Ok(Reply { id, ..Reply::ok() })
        }
        ClientEvent::EditMessage { id, new_text } => {
            hub.edit_message(conn, &id, &new_text).await?;
            Ok(Reply::ok())
        }
        ClientEvent::DeleteMessage { id } => {
            hub.delete_message(conn, &id).await?;
            Ok(Reply::ok())
        }
        ClientEvent::Typing => {
            hub.typing(conn)?;
            Ok(Reply::ok())
        }
        ClientEvent::StopTyping => {
            hub.stop_typing(conn)?;
            Ok(Reply::ok())
        }
    }
}

/// Answer a request: an `ack` frame when one was asked for, otherwise an
/// error line on failure and nothing on success.
fn respond(hub: &ChatHub, conn: ConnId, ack: Option<u64>, result: Result<Reply>) {
    if let Err(e) = &result {
        debug!(conn, error = %e, "Request failed");
    }
    let event = match (ack, result) {
        (Some(ack), Ok(reply)) => ServerEvent::ack(ack, reply),
        (Some(ack), Err(e)) => ServerEvent::ack(ack, Reply::err(e.to_string())),
        (None, Err(e)) => ServerEvent::error(e.to_string()),
        (None, Ok(_)) => return,
    };
    hub.bus.send_to(conn, event);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn next_event(rx: &mut UnboundedReceiver<Outbound>) -> ServerEvent {
        match rx.try_recv() {
            Ok(Outbound::Event(event)) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[test]
    fn test_client_ip() {
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        assert_eq!(client_ip(&headers, peer, false), "192.168.1.5");
        assert_eq!(client_ip(&headers, peer, true), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new(), peer, true), "192.168.1.5");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    async fn exploding_handler() -> Result<Reply> {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn test_panicking_handler_is_answered_and_socket_survives() {
        let hub = ChatHub::new(ChatConfig::default(), Arc::new(MemoryStore::new()));
        let (conn, mut rx) = hub.open_connection("127.0.0.1");

        let result = guarded(conn, exploding_handler()).await;
        assert!(matches!(&result, Err(ParlorError::Internal(_))));
        respond(&hub, conn, Some(7), result);

        let ServerEvent::Ack {
            ack,
            success,
            error,
            ..
        } = next_event(&mut rx)
        else {
            panic!("expected an ack");
        };
        assert_eq!(ack, 7);
        assert!(!success);
        assert_eq!(error.as_deref(), Some("request failed"));

        assert_eq!(hub.connection_count(), 1);
        handle_frame(
            &hub,
            conn,
            r#"{"event":"signup","ack":8,"username":"alice","password":"password123"}"#,
        )
        .await;
        let ServerEvent::Ack { ack, success, .. } = next_event(&mut rx) else {
            panic!("expected an ack");
        };
        assert_eq!(ack, 8);
        assert!(success);
    }

    #[tokio::test]
    async fn test_guarded_passes_results_through() {
        let result = guarded(1, async { Ok(Reply::ok()) }).await;
        assert!(result.is_ok());
        let result = guarded(1, async {
            Err(ParlorError::Validation("bad".to_string()))
        })
        .await;
        assert!(matches!(result, Err(ParlorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_handle_frame_acks() {
        let hub = ChatHub::new(ChatConfig::default(), Arc::new(MemoryStore::new()));
        let (conn, mut rx) = hub.open_connection("127.0.0.1");

        handle_frame(
            &hub,
            conn,
            r#"{"event":"signup","ack":1,"username":"alice","password":"password123"}"#,
        )
        .await;
        let ServerEvent::Ack {
            ack,
            success,
            account,
            ..
        } = next_event(&mut rx)
        else {
            panic!("expected an ack");
        };
        assert_eq!(ack, 1);
        assert!(success);
        assert_eq!(account.unwrap().username, "alice");

        handle_frame(&hub, conn, r#"{"event":"sendMessage","ack":2,"text":"hi"}"#).await;
        let ServerEvent::Ack { success, error, .. } = next_event(&mut rx) else {
            panic!("expected an ack");
        };
        assert!(!success);
        assert_eq!(error.as_deref(), Some("you must log in first"));
    }

    #[tokio::test]
    async fn test_handle_frame_without_ack_reports_errors() {
        let hub = ChatHub::new(ChatConfig::default(), Arc::new(MemoryStore::new()));
        let (conn, mut rx) = hub.open_connection("127.0.0.1");

        handle_frame(&hub, conn, "not json").await;
        assert_eq!(next_event(&mut rx), ServerEvent::error("invalid event"));

        handle_frame(&hub, conn, r#"{"event":"typing"}"#).await;
        assert_eq!(
            next_event(&mut rx),
            ServerEvent::error("you must log in first")
        );
        assert!(rx.try_recv().is_err());
    }
}
