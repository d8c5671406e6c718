//! Transport behavior against a local WebSocket server.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use printhub_core::{JobEvent, JobStatus};
use printhub_sync::{ChannelMessage, ConnectionState, Transport, TransportConfig, TransportHandle};

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("station never connected")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next protocol message, skipping keepalive frames.
async fn next_message(ws: &mut WebSocketStream<TcpStream>) -> ChannelMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no message from the station")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return ChannelMessage::from_json(&text).unwrap();
        }
    }
}

fn config(url: String) -> TransportConfig {
    let mut config = TransportConfig::new(url, ChannelMessage::hello("store-17"));
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect_interval = Duration::from_millis(50);
    config.ping_interval = Duration::from_secs(60);
    config
}

fn status(n: u32) -> ChannelMessage {
    ChannelMessage::JobStatus(JobEvent {
        job_id: format!("job-{n}"),
        status: JobStatus::Printing,
        printer: Some("P1".into()),
        error: None,
        attempt: 1,
        accepted: false,
        timestamp: "2026-10-19T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
    })
}

async fn wait_for(handle: &TransportHandle, wanted: impl Fn(ConnectionState) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !wanted(handle.state().await) {
        assert!(Instant::now() < deadline, "transport state never changed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_buffered_messages_follow_hello_after_reconnect() {
    let (listener, url) = listen().await;
    let (handle, _incoming) = Transport::spawn(config(url));

    let mut first = accept(&listener).await;
    assert!(matches!(next_message(&mut first).await, ChannelMessage::Hello(_)));
    first.close(None).await.unwrap();
    drop(first);

    wait_for(&handle, |state| state != ConnectionState::Connected).await;
    for n in 0..5 {
        handle.send(status(n)).unwrap();
    }
    handle.send(ChannelMessage::heartbeat("store-17")).unwrap();

    let mut second = accept(&listener).await;
    let ChannelMessage::Hello(hello) = next_message(&mut second).await else {
        panic!("expected Hello first");
    };
    assert_eq!(hello.station_id, "store-17");

    for n in 0..5 {
        assert_eq!(next_message(&mut second).await, status(n));
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_incoming_messages_reach_the_receiver() {
    let (listener, url) = listen().await;
    let (handle, mut incoming) = Transport::spawn(config(url));

    let mut ws = accept(&listener).await;
    next_message(&mut ws).await;

    let ping = ChannelMessage::Ping {
        timestamp: "2026-10-19T12:00:00Z".into(),
    };
    ws.send(Message::Text(ping.to_json().unwrap().into())).await.unwrap();

    let received = timeout(Duration::from_secs(5), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ping);

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let ChannelMessage::Error { code, .. } = next_message(&mut ws).await else {
        panic!("expected an Error reply");
    };
    assert_eq!(code, "INVALID_MESSAGE");

    handle.shutdown().await.unwrap();
}
