use crate::chat_logic::config::Settings;
use crate::chat_logic::state::ChatState;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use lib_relay::store::MessageStore;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub async fn run<S: MessageStore>(settings: Settings, state: ChatState<S>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("Chat server listening on {}", addr);

    serve(listener, &settings, state).await
}

/// Serves the chat app on an already bound listener until shutdown is signalled.
pub async fn serve<S: MessageStore>(listener: TcpListener, settings: &Settings, state: ChatState<S>) -> Result<()> {
    let mut shutdown = state.shutdown.subscribe();
    let app = app(settings, state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Chat server shutting down.");
        })
        .await
        .context("Chat server terminated unexpectedly")?;

    Ok(())
}

pub fn app<S: MessageStore>(settings: &Settings, state: ChatState<S>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health_handler::<S>))
        .fallback_service(ServeDir::new(&settings.static_dir))
        .layer(cors_layer(settings.client_origin.as_deref()))
        .with_state(state)
}

pub fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => base.allow_origin(origin).allow_credentials(true),
        Some(Err(e)) => {
            log::warn!("Ignoring invalid client origin: {}", e);
            base.allow_origin(Any)
        }
        None => base.allow_origin(Any),
    }
}

async fn ws_handler<S: MessageStore>(ws: WebSocketUpgrade, State(state): State<ChatState<S>>) -> impl IntoResponse {
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, state, shutdown))
}

async fn health_handler<S: MessageStore>(State(state): State<ChatState<S>>) -> impl IntoResponse {
    match state.router.store().ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            log::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn handle_socket<S: MessageStore>(
    mut socket: WebSocket,
    state: ChatState<S>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (session, mut outbound) = state.sessions.connect();

    // Frames are handled in arrival order by their own task; this loop keeps
    // draining outbound events and watching for shutdown meanwhile.
    let (frames, mut pending) = mpsc::unbounded_channel::<Utf8Bytes>();
    let worker = {
        let router = state.router.clone();
        let session = session.clone();
        tokio::spawn(async move {
            while let Some(text) = pending.recv().await {
                router.handle_frame(&session, text.as_str()).await;
            }
        })
    };

    let reason = loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if frames.send(text).is_err() {
                            break "frame worker stopped";
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "client close",
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Session {} transport error: {}", session.id(), e);
                        break "transport error";
                    }
                }
            }
            Some(event) = outbound.recv() => {
                match event.to_frame() {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break "send failed";
                        }
                    }
                    Err(e) => log::error!("Session {}: failed to encode outbound event: {}", session.id(), e),
                }
            }
            _ = shutdown.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break "server shutdown";
            }
        }
    };

    // A queued register must not rejoin a room after cleanup.
    worker.abort();
    let _ = worker.await;
    state.sessions.disconnect(session.id(), reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_logic::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::{SinkExt, StreamExt};
    use lib_relay::model::Message as ChatMessage;
    use lib_relay::store::{MemoryStore, StoreError};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn test_app(origin: Option<&str>) -> Router {
        let mut settings = Config::default().settings();
        settings.client_origin = origin.map(str::to_string);
        let (shutdown, _) = broadcast::channel(1);
        app(&settings, ChatState::new(Arc::new(MemoryStore::new()), 8, shutdown))
    }

    #[tokio::test]
    async fn health_reports_ok_for_reachable_store() {
        let response = test_app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_echoes_configured_origin() {
        let response = test_app(Some("http://chat.example"))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://chat.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://chat.example"
        );
        assert_eq!(response.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_not_upgraded() {
        let response = test_app(None)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    /// Store whose writes never complete.
    struct StalledStore;

    impl MessageStore for StalledStore {
        async fn append(&self, _room: &str, _message: &ChatMessage) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn list(&self, _room: &str) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn start<S: MessageStore>(store: S) -> (String, ChatState<S>, JoinHandle<Result<()>>) {
        let settings = Config::default().settings();
        let (shutdown, _) = broadcast::channel(1);
        let state = ChatState::new(Arc::new(store), 8, shutdown);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let server_state = state.clone();
        let server = tokio::spawn(async move { serve(listener, &settings, server_state).await });
        (url, state, server)
    }

    async fn send(client: &mut Client, frame: Value) {
        client.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    }

    async fn next_frame(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("no frame within 5s")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn wait_for_no_sessions<S: MessageStore>(state: &ChatState<S>) {
        for _ in 0..250 {
            if state.sessions.live_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session was not reclaimed");
    }

    #[tokio::test]
    async fn socket_round_trip_and_reclaim_on_close() {
        let (url, state, server) = start(MemoryStore::new()).await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        send(&mut client, json!({"event": "register", "data": "lobby"})).await;
        let notice = next_frame(&mut client).await;
        assert_eq!(notice["event"], "notice");
        assert_eq!(state.sessions.live_count(), 1);

        let message = json!({"content": "hi", "id": "1", "room": "lobby", "time": "t1"});
        send(&mut client, json!({"event": "message", "data": message})).await;
        let reply = next_frame(&mut client).await;
        assert_eq!(reply["event"], "reply");
        assert_eq!(reply["data"]["content"], "hi");
        assert_eq!(reply["data"]["room"], "lobby");

        send(&mut client, json!({"event": "getMessages", "data": {"userId": "lobby", "id": "lobby"}})).await;
        let history = next_frame(&mut client).await;
        assert_eq!(history["event"], "prevMessages");
        assert_eq!(history["data"].as_array().map(Vec::len), Some(1));

        client.send(WsMessage::Text("not json".to_string().into())).await.unwrap();
        let error = next_frame(&mut client).await;
        assert_eq!(error["event"], "error");
        assert_eq!(error["data"]["kind"], "encoding");

        client.close(None).await.unwrap();
        wait_for_no_sessions(&state).await;

        let _ = state.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_socket_while_store_write_is_stuck() {
        let (url, state, server) = start(StalledStore).await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        send(&mut client, json!({"event": "register", "data": "lobby"})).await;
        assert_eq!(next_frame(&mut client).await["event"], "notice");

        send(&mut client, json!({"event": "message", "data": {"content": "hi", "room": "lobby"}})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.shutdown.send(()).unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket stayed open during shutdown");
        wait_for_no_sessions(&state).await;
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
    }
}
