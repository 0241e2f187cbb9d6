//! Observer WebSocket integration tests.
//!
//! A real listener on an ephemeral port, real clients via
//! `tokio_tungstenite::connect_async`.

use futures_util::{SinkExt, StreamExt};
use relaydesk_core::ask_user::Question;
use relaydesk_core::gateway::serve_observers;
use relaydesk_core::{AgentEvent, Coordinator};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(coordinator: &Coordinator) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let cancel = CancellationToken::new();
    tokio::spawn(serve_observers(listener, coordinator.clone(), cancel.clone()));
    (url, cancel)
}

/// Connect `count` observers and wait until each holds a bus subscription.
async fn connect(coordinator: &Coordinator, url: &str, count: usize) -> Vec<Client> {
    let baseline = coordinator.bus().subscriber_count();
    let mut clients = Vec::new();
    for _ in 0..count {
        let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        clients.push(client);
    }
    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.bus().subscriber_count() < baseline + count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("observers never subscribed");
    clients
}

async fn next_json(client: &mut Client) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame received");
    serde_json::from_str(&frame).unwrap()
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_observer_receives_events_in_order() {
    let coordinator = Coordinator::in_memory().unwrap();
    let (url, cancel) = start(&coordinator).await;
    let mut clients = connect(&coordinator, &url, 1).await;

    coordinator.bus().emit(AgentEvent::AgentStart {
        conversation_id: "c1".into(),
    });
    coordinator.bus().emit(AgentEvent::TextChunk {
        conversation_id: "c1".into(),
        text: "hi".into(),
    });

    let client = &mut clients[0];
    assert_eq!(
        next_json(client).await,
        json!({ "type": "agent_start", "conversationId": "c1" })
    );
    assert_eq!(
        next_json(client).await,
        json!({ "type": "text_chunk", "conversationId": "c1", "text": "hi" })
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_observer_answers_pending_question() {
    let coordinator = Coordinator::in_memory().unwrap();
    let (url, cancel) = start(&coordinator).await;
    let mut clients = connect(&coordinator, &url, 1).await;

    let bridge = coordinator.ask_user().clone();
    let asking = tokio::spawn(async move {
        bridge
            .ask(Question::new("q1", "Deploy now?").with_options(["yes", "no"]))
            .await
    });

    let client = &mut clients[0];
    let frame = next_json(client).await;
    assert_eq!(frame["type"], "ask_user");
    assert_eq!(frame["questionId"], "q1");
    assert_eq!(frame["options"], json!(["yes", "no"]));

    send_json(
        client,
        json!({ "type": "user:answer", "questionId": "q1", "answer": "yes" }),
    )
    .await;
    assert_eq!(
        next_json(client).await,
        json!({ "type": "answer_ack", "questionId": "q1", "accepted": true })
    );
    assert_eq!(asking.await.unwrap().unwrap(), "yes");
    cancel.cancel();
}

#[tokio::test]
async fn test_only_first_observer_answer_is_accepted() {
    let coordinator = Coordinator::in_memory().unwrap();
    let (url, cancel) = start(&coordinator).await;
    let mut clients = connect(&coordinator, &url, 2).await;

    let bridge = coordinator.ask_user().clone();
    let asking = tokio::spawn(async move { bridge.ask(Question::new("q1", "Which?")).await });

    for client in clients.iter_mut() {
        assert_eq!(next_json(client).await["type"], "ask_user");
    }

    send_json(
        &mut clients[0],
        json!({ "type": "user:answer", "questionId": "q1", "answer": "A" }),
    )
    .await;
    let first = next_json(&mut clients[0]).await;
    send_json(
        &mut clients[1],
        json!({ "type": "user:answer", "questionId": "q1", "answer": "B" }),
    )
    .await;
    let second = next_json(&mut clients[1]).await;

    assert_eq!(first["accepted"], true);
    assert_eq!(second["accepted"], false);
    assert_eq!(asking.await.unwrap().unwrap(), "A");
    cancel.cancel();
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let coordinator = Coordinator::in_memory().unwrap();
    let (url, cancel) = start(&coordinator).await;
    let mut clients = connect(&coordinator, &url, 1).await;
    let client = &mut clients[0];

    client.send(Message::Text("garbage".into())).await.unwrap();
    assert_eq!(next_json(client).await["type"], "error");

    coordinator.bus().emit(AgentEvent::AgentStopped {
        conversation_id: "c1".into(),
    });
    assert_eq!(next_json(client).await["type"], "agent_stopped");
    cancel.cancel();
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let coordinator = Coordinator::in_memory().unwrap();
    let (url, cancel) = start(&coordinator).await;
    let mut clients = connect(&coordinator, &url, 1).await;

    let mut client = clients.pop().unwrap();
    client.close(None).await.unwrap();
    drop(client);

    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.bus().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("subscription outlived the connection");
    cancel.cancel();
}
