//! End-to-end tests: a fake upstream producer, a running relay, and real
//! WebSocket subscribers.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gaze_relay_lib::{Point, Relay, RelayConfig, RelayHandle};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};

const CREDENTIAL: &str = "test-credential";
const WAIT: Duration = Duration::from_secs(5);

struct FakeUpstream {
    listener: TcpListener,
}

impl FakeUpstream {
    async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/", self.listener.local_addr().unwrap())
    }

    /// Accept the relay's next connection and check the credential frame
    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("relay did not connect")
            .unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        assert_eq!(next_text(&mut ws).await, CREDENTIAL);
        ws
    }

    /// Accept and authorize the relay's next connection
    async fn accept_authorized(&self, relay: &RelayHandle) -> WebSocketStream<TcpStream> {
        let mut ws = self.accept().await;
        ws.send(Message::Text("ok".into())).await.unwrap();
        wait_until(|| relay.is_authorized()).await;
        ws
    }
}

async fn start_relay(upstream: &FakeUpstream) -> RelayHandle {
    let config = RelayConfig::new("127.0.0.1:0".parse().unwrap(), upstream.url(), CREDENTIAL)
        .with_reconnect_delays(Duration::from_millis(50), Duration::from_millis(200));
    Relay::new(config).start().await.unwrap()
}

async fn subscribe(relay: &RelayHandle) -> WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
    let before = relay.hub().subscriber_count();
    let (ws, _) = connect_async(format!("ws://{}/", relay.local_addr()))
        .await
        .unwrap();
    wait_until(|| relay.hub().subscriber_count() > before).await;
    ws
}

async fn next_text<S>(ws: &mut WebSocketStream<S>) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

/// Drain until the peer closes the connection
async fn wait_closed<S>(ws: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("connection was not closed");
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn send_point<S>(ws: &mut WebSocketStream<S>, x: f64, y: f64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = format!(r#"{{"GazeX": {}, "GazeY": {}, "Timestamp": 1}}"#, x, y);
    ws.send(Message::Text(frame)).await.unwrap();
}

#[tokio::test]
async fn test_point_fans_out_to_all_subscribers() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;

    let mut a = subscribe(&relay).await;
    let mut b = subscribe(&relay).await;

    producer
        .send(Message::Text(r#"{"GazeX": 0.5, "GazeY": 0.25}"#.into()))
        .await
        .unwrap();

    assert_eq!(next_text(&mut a).await, r#"{"x":0.5,"y":0.25}"#);
    assert_eq!(next_text(&mut b).await, r#"{"x":0.5,"y":0.25}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_late_joiner_receives_latest_point_first() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;

    send_point(&mut producer, 1.0, 1.5).await;
    send_point(&mut producer, 2.0, 2.5).await;
    send_point(&mut producer, 3.0, 3.5).await;
    wait_until(|| relay.hub().latest() == Some(Point::new(3.0, 3.5))).await;

    let mut late = subscribe(&relay).await;
    assert_eq!(next_text(&mut late).await, r#"{"x":3.0,"y":3.5}"#);

    send_point(&mut producer, 4.0, 4.5).await;
    assert_eq!(next_text(&mut late).await, r#"{"x":4.0,"y":4.5}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_bad_frames_are_dropped() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;
    let mut subscriber = subscribe(&relay).await;

    producer.send(Message::Text("{not json".into())).await.unwrap();
    producer
        .send(Message::Text(r#"{"GazeX": 0.5}"#.into()))
        .await
        .unwrap();
    producer
        .send(Message::Text(r#"{"GazeX": "left", "GazeY": 0.1}"#.into()))
        .await
        .unwrap();
    send_point(&mut producer, 0.75, 0.125).await;

    // Nothing from the bad frames reaches subscribers
    assert_eq!(next_text(&mut subscriber).await, r#"{"x":0.75,"y":0.125}"#);
    assert!(relay.is_authorized());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_auth_failure_closes_and_reconnects() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;

    let mut first = upstream.accept().await;
    first.send(Message::Text("fail".into())).await.unwrap();
    wait_closed(&mut first).await;
    assert!(!relay.is_authorized());

    let mut second = upstream.accept().await;
    second.send(Message::Text("ok, welcome".into())).await.unwrap();
    wait_until(|| relay.is_authorized()).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_first_frame_is_never_data() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut subscriber = subscribe(&relay).await;

    let mut first = upstream.accept().await;
    send_point(&mut first, 0.5, 0.5).await;
    wait_closed(&mut first).await;
    assert!(relay.hub().latest().is_none());

    let mut second = upstream.accept_authorized(&relay).await;
    send_point(&mut second, 0.25, 0.75).await;
    assert_eq!(next_text(&mut subscriber).await, r#"{"x":0.25,"y":0.75}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_upstream_outage_is_transparent_to_subscribers() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;
    let mut subscriber = subscribe(&relay).await;

    send_point(&mut producer, 0.1, 0.2).await;
    assert_eq!(next_text(&mut subscriber).await, r#"{"x":0.1,"y":0.2}"#);

    producer.close(None).await.unwrap();
    drop(producer);
    wait_until(|| !relay.is_authorized()).await;
    assert_eq!(relay.hub().latest(), Some(Point::new(0.1, 0.2)));

    let mut producer = upstream.accept_authorized(&relay).await;
    send_point(&mut producer, 0.3, 0.4).await;
    assert_eq!(next_text(&mut subscriber).await, r#"{"x":0.3,"y":0.4}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_closed_subscriber_is_excluded() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;

    let mut leaving = subscribe(&relay).await;
    let mut staying = subscribe(&relay).await;
    assert_eq!(relay.hub().subscriber_count(), 2);

    leaving.close(None).await.unwrap();
    wait_until(|| relay.hub().subscriber_count() == 1).await;

    send_point(&mut producer, 0.9, 0.8).await;
    assert_eq!(next_text(&mut staying).await, r#"{"x":0.9,"y":0.8}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_plain_http_liveness_probe() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;

    let mut stream = TcpStream::connect(relay.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /status HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .expect("no http response")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
    assert!(response.ends_with("gaze relay is running\n"), "{}", response);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_binary_first_frame_rejects_auth() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;

    let mut first = upstream.accept().await;
    first.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
    wait_closed(&mut first).await;
    assert!(!relay.is_authorized());

    // A reconnect follows and can authorize normally
    let _second = upstream.accept_authorized(&relay).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_binary_data_frame_is_relayed() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;
    let mut subscriber = subscribe(&relay).await;

    producer
        .send(Message::Binary(br#"{"GazeX":0.5,"GazeY":0.25}"#.to_vec()))
        .await
        .unwrap();

    assert_eq!(next_text(&mut subscriber).await, r#"{"x":0.5,"y":0.25}"#);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_upstream_ping_is_answered() {
    let upstream = FakeUpstream::bind().await;
    let relay = start_relay(&upstream).await;
    let mut producer = upstream.accept_authorized(&relay).await;

    producer.send(Message::Ping(vec![1, 2, 3])).await.unwrap();

    let pong = timeout(WAIT, async {
        loop {
            match producer.next().await {
                Some(Ok(Message::Pong(data))) => return data,
                Some(Ok(_)) => continue,
                other => panic!("connection ended before pong: {:?}", other),
            }
        }
    })
    .await
    .expect("no pong received");
    assert_eq!(pong, vec![1, 2, 3]);
    assert!(relay.is_authorized());

    relay.shutdown().await;
}
