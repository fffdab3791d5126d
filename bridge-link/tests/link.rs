use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use craftlink_bridge_core::{Agent, AgentError, BridgeRuntime, CoreConfig, StatusReporter};
use craftlink_bridge_link::LinkServer;
use craftlink_bridge_protocol::{AgentTurn, StatusEvent};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Asks for one command per chat message and reports the results back.
struct CommandingAgent;

#[async_trait]
impl Agent for CommandingAgent {
    async fn process_user_message(&self, text: &str) -> Result<AgentTurn, AgentError> {
        Ok(AgentTurn {
            text: Some(format!("heard {text}")),
            commands: vec!["time set day".to_string()],
            new_session: false,
        })
    }

    async fn process_command_results(&self, results: &[String]) -> Result<AgentTurn, AgentError> {
        Ok(AgentTurn::reply(format!("results: {}", results.join(", "))))
    }
}

async fn start_server() -> (LinkServer, mpsc::UnboundedReceiver<StatusEvent>) {
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let runtime = BridgeRuntime::new(
        CoreConfig {
            cooldown: Duration::ZERO,
            request_timeout: Duration::from_secs(2),
            ..CoreConfig::default()
        },
        Arc::new(CommandingAgent),
        StatusReporter::new(status_tx),
    )
    .expect("runtime");
    let server = LinkServer::bind("127.0.0.1:0", Arc::new(runtime))
        .await
        .expect("bind server");
    (server, status_rx)
}

async fn connect(server: &LinkServer) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}", server.local_addr()))
        .await
        .expect("connect client");
    client
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

fn command_line(frame: &Value) -> &str {
    frame["body"]["commandLine"].as_str().expect("command line")
}

fn chat_text(frame: &Value) -> String {
    let raw = command_line(frame)
        .strip_prefix("tellraw @a ")
        .expect("tellraw command");
    let rawtext: Value = serde_json::from_str(raw).expect("rawtext json");
    rawtext["rawtext"][0]["text"]
        .as_str()
        .expect("text")
        .to_string()
}

async fn next_status(status_rx: &mut mpsc::UnboundedReceiver<StatusEvent>) -> StatusEvent {
    tokio::time::timeout(Duration::from_secs(2), status_rx.recv())
        .await
        .expect("status before timeout")
        .expect("status channel open")
}

fn chat_frame(sender: &str, message: &str) -> Message {
    Message::Text(
        json!({
            "header": { "eventName": "PlayerMessage", "messagePurpose": "event" },
            "body": { "type": "chat", "sender": sender, "message": message }
        })
        .to_string(),
    )
}

async fn connect_and_greet(
    server: &LinkServer,
    status_rx: &mut mpsc::UnboundedReceiver<StatusEvent>,
) -> Client {
    let mut client = connect(server).await;
    assert!(matches!(next_status(status_rx).await, StatusEvent::Connected { .. }));
    let greeting = next_frame(&mut client).await;
    assert!(chat_text(&greeting).contains("WebSocket connected"));
    let subscribe = next_frame(&mut client).await;
    assert_eq!(subscribe["header"]["messagePurpose"], "subscribe");
    client
}

#[tokio::test]
async fn chat_command_and_response_round_trip() {
    let (server, mut status_rx) = start_server().await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Listening { .. }));

    let mut client = connect(&server).await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Connected { .. }));

    let greeting = next_frame(&mut client).await;
    assert!(chat_text(&greeting).contains("WebSocket connected"));
    let subscribe = next_frame(&mut client).await;
    assert_eq!(subscribe["header"]["messagePurpose"], "subscribe");
    assert_eq!(subscribe["body"]["eventName"], "PlayerMessage");

    let chat = json!({
        "header": { "eventName": "PlayerMessage", "messagePurpose": "event" },
        "body": { "type": "chat", "sender": "Steve", "message": "make it day" }
    });
    client
        .send(Message::Text(chat.to_string()))
        .await
        .expect("send chat");

    let reply = next_frame(&mut client).await;
    assert_eq!(chat_text(&reply), "§e<AI> §rheard <Steve> make it day");
    let echo = next_frame(&mut client).await;
    assert_eq!(chat_text(&echo), "§e[runCommand] §r: time set day");
    let command = next_frame(&mut client).await;
    assert_eq!(command_line(&command), "time set day");
    assert_eq!(command["header"]["messagePurpose"], "commandRequest");

    let response = json!({
        "header": {
            "requestId": command["header"]["requestId"],
            "messagePurpose": "commandResponse"
        },
        "body": { "statusCode": 0, "statusMessage": "Set the time to 1000" }
    });
    client
        .send(Message::Text(response.to_string()))
        .await
        .expect("send response");

    let follow_up = next_frame(&mut client).await;
    assert_eq!(chat_text(&follow_up), "§e<AI> §rresults: Set the time to 1000");

    server.stop("test finished").await.expect("stop server");
}

#[tokio::test]
async fn new_peer_replaces_the_active_one_and_stop_reports() {
    let (server, mut status_rx) = start_server().await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Listening { .. }));

    let mut first = connect(&server).await;
    next_frame(&mut first).await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Connected { .. }));

    let mut second = connect(&server).await;
    assert!(matches!(
        next_status(&mut status_rx).await,
        StatusEvent::Disconnected { .. }
    ));
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Connected { .. }));

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "replaced peer should be closed");

    let greeting = next_frame(&mut second).await;
    assert!(chat_text(&greeting).contains("WebSocket connected"));

    server.stop("shutting down").await.expect("stop server");
    assert!(matches!(
        next_status(&mut status_rx).await,
        StatusEvent::Disconnected { .. }
    ));
    assert_eq!(
        next_status(&mut status_rx).await,
        StatusEvent::Stopped {
            reason: "shutting down".to_string()
        }
    );
}

#[tokio::test]
async fn failed_handshake_leaves_the_active_peer_connected() {
    let (server, mut status_rx) = start_server().await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Listening { .. }));
    let mut game = connect_and_greet(&server, &mut status_rx).await;

    let mut stray = TcpStream::connect(server.local_addr())
        .await
        .expect("connect raw tcp");
    stray
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .expect("write plain http request");

    assert!(matches!(
        next_status(&mut status_rx).await,
        StatusEvent::TransportError { .. }
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(status_rx.try_recv().is_err(), "no further status after the stray request");

    game.send(chat_frame("Steve", "still here?"))
        .await
        .expect("send chat");
    let reply = next_frame(&mut game).await;
    assert_eq!(chat_text(&reply), "§e<AI> §rheard <Steve> still here?");

    server.stop("test finished").await.expect("stop server");
}

#[tokio::test]
async fn invalid_utf8_text_fails_only_that_peer() {
    let (server, mut status_rx) = start_server().await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Listening { .. }));
    let mut first = connect_and_greet(&server, &mut status_rx).await;

    let garbage = Frame::message(vec![0xff, 0xfe], OpCode::Data(Data::Text), true);
    first
        .send(Message::Frame(garbage))
        .await
        .expect("send invalid text frame");

    let close_code = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(frame))) => break frame.map(|frame| frame.code),
                Some(Ok(_)) => continue,
                None | Some(Err(_)) => break None,
            }
        }
    })
    .await
    .expect("peer closed before timeout");
    assert_eq!(close_code, Some(CloseCode::Invalid));
    assert!(matches!(
        next_status(&mut status_rx).await,
        StatusEvent::Disconnected { code: Some(1007), .. }
    ));

    let mut second = connect_and_greet(&server, &mut status_rx).await;
    second
        .send(chat_frame("Alex", "hello"))
        .await
        .expect("send chat");
    let reply = next_frame(&mut second).await;
    assert_eq!(chat_text(&reply), "§e<AI> §rheard <Alex> hello");

    server.stop("test finished").await.expect("stop server");
}

#[tokio::test]
async fn run_until_stops_when_shutdown_resolves() {
    let (server, mut status_rx) = start_server().await;
    assert!(matches!(next_status(&mut status_rx).await, StatusEvent::Listening { .. }));

    server
        .run_until(async { "signal received".to_string() })
        .await
        .expect("server stopped cleanly");

    assert_eq!(
        next_status(&mut status_rx).await,
        StatusEvent::Stopped {
            reason: "signal received".to_string()
        }
    );
}
