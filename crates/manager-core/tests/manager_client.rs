//! Integration tests for the manager client against a scripted in-process PBX
//!
//! Each test binds a loopback listener and plays the server side of the wire
//! protocol by hand: banner, login handshake, event subscription, then
//! whatever the scenario needs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use trunkline_manager_core::{
    ConnectionState, ManagerClient, ManagerConfig, ManagerError, ManagerEvent, Message,
    MessageBuffer, ReconnectPolicy,
};

/// Honor `RUST_LOG` when a test run wants the client's trace output
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn read_frame(rd: &mut OwnedReadHalf, buf: &mut MessageBuffer) -> Message {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(message) = buf.next_message() {
            return message;
        }
        let n = rd.read(&mut chunk).await.expect("server read");
        assert!(n > 0, "client closed the connection mid-frame");
        buf.extend(&chunk[..n]);
    }
}

async fn respond_success(wr: &mut OwnedWriteHalf, action_id: &str, extra: &[(&str, &str)]) {
    let mut frame = format!("Response: Success\r\nActionID: {action_id}\r\n");
    for (key, value) in extra {
        frame.push_str(&format!("{key}: {value}\r\n"));
    }
    frame.push_str("\r\n");
    wr.write_all(frame.as_bytes()).await.expect("server write");
}

/// Play the server side of banner + login + event subscription
async fn handshake(stream: TcpStream) -> (OwnedReadHalf, OwnedWriteHalf, MessageBuffer) {
    let (mut rd, mut wr) = stream.into_split();
    wr.write_all(b"Asterisk Call Manager/5.0\r\n")
        .await
        .expect("banner");
    let mut buf = MessageBuffer::new();

    let login = read_frame(&mut rd, &mut buf).await;
    assert_eq!(login.get("Action"), Some("Login"));
    assert_eq!(login.get("Username"), Some("admin"));
    assert_eq!(login.get("Secret"), Some("secret"));
    let login_id = login.action_id().expect("login carries an id").to_string();
    respond_success(&mut wr, &login_id, &[]).await;

    let events = read_frame(&mut rd, &mut buf).await;
    assert_eq!(events.get("Action"), Some("Events"));
    assert_eq!(events.get("EventMask"), Some("on"));
    let events_id = events.action_id().expect("id").to_string();
    respond_success(&mut wr, &events_id, &[]).await;

    (rd, wr, buf)
}

fn config_for(addr: SocketAddr) -> ManagerConfig {
    ManagerConfig::new("127.0.0.1", "admin", "secret")
        .with_port(addr.port())
        .with_reconnect(ReconnectPolicy {
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 2,
        })
}

#[tokio::test]
async fn logs_in_submits_and_receives_events() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut rd, mut wr, mut buf) = handshake(stream).await;

        let ping = read_frame(&mut rd, &mut buf).await;
        assert_eq!(ping.get("Action"), Some("Ping"));
        let id = ping.action_id().unwrap().to_string();
        respond_success(&mut wr, &id, &[("Ping", "Pong")]).await;

        wr.write_all(
            b"Event: Newchannel\r\nUniqueid: 1693.42\r\nChannel: SIP/1001-0001\r\n\
              CallerIDNum: 1001\r\nExten: 2000\r\n\r\n",
        )
        .await
        .unwrap();

        // Keep the connection up until the client goes away
        let mut chunk = [0u8; 64];
        while rd.read(&mut chunk).await.unwrap_or(0) > 0 {}
    });

    let client = ManagerClient::connect(config_for(addr));
    client.ready().await.expect("ready");
    let mut events = client.subscribe();

    let response = client.submit("Ping", &[]).await.expect("ping response");
    assert!(response.is_success());
    assert_eq!(response.get("Ping"), Some("Pong"));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within deadline")
        .expect("event");
    match event {
        ManagerEvent::NewChannel {
            unique_id,
            channel,
            caller_id_num,
            exten,
        } => {
            assert_eq!(unique_id, "1693.42");
            assert_eq!(channel, "SIP/1001-0001");
            assert_eq!(caller_id_num.as_deref(), Some("1001"));
            assert_eq!(exten.as_deref(), Some("2000"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    client.close().await;
    server.abort();
}

#[tokio::test]
async fn interleaved_responses_resolve_by_action_id() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut rd, mut wr, mut buf) = handshake(stream).await;

        let first = read_frame(&mut rd, &mut buf).await;
        let second = read_frame(&mut rd, &mut buf).await;

        // Respond in reverse order, echoing the action name
        for frame in [&second, &first] {
            let id = frame.action_id().unwrap().to_string();
            let action = frame.get("Action").unwrap().to_string();
            respond_success(&mut wr, &id, &[("Echo", &action)]).await;
        }

        let mut chunk = [0u8; 64];
        while rd.read(&mut chunk).await.unwrap_or(0) > 0 {}
    });

    let client = ManagerClient::connect(config_for(addr));
    client.ready().await.expect("ready");

    let (alpha, beta) = tokio::join!(
        client.submit("Alpha", &[]),
        client.submit("Beta", &[]),
    );
    assert_eq!(alpha.expect("alpha").get("Echo"), Some("Alpha"));
    assert_eq!(beta.expect("beta").get("Echo"), Some("Beta"));

    client.close().await;
    server.abort();
}

#[tokio::test]
async fn timeout_removes_pending_and_drops_the_late_response() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut rd, mut wr, mut buf) = handshake(stream).await;

        let slow = read_frame(&mut rd, &mut buf).await;
        assert_eq!(slow.get("Action"), Some("Slow"));
        let slow_id = slow.action_id().unwrap().to_string();

        // Respond well after the client's 1s action timeout
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        respond_success(&mut wr, &slow_id, &[("Echo", "Slow")]).await;

        let fast = read_frame(&mut rd, &mut buf).await;
        assert_eq!(fast.get("Action"), Some("Fast"));
        let fast_id = fast.action_id().unwrap().to_string();
        respond_success(&mut wr, &fast_id, &[("Echo", "Fast")]).await;

        let mut chunk = [0u8; 64];
        while rd.read(&mut chunk).await.unwrap_or(0) > 0 {}
    });

    let config = config_for(addr).with_action_timeout(Duration::from_secs(1));
    let client = ManagerClient::connect(config);
    client.ready().await.expect("ready");

    let err = client.submit("Slow", &[]).await.expect_err("times out");
    assert!(matches!(err, ManagerError::Timeout { seconds: 1 }));

    // The late response for the timed-out id must not be misapplied here
    let response = client.submit("Fast", &[]).await.expect("fast response");
    assert_eq!(response.get("Echo"), Some("Fast"));

    client.close().await;
    server.abort();
}

#[tokio::test]
async fn connection_drop_fails_outstanding_actions() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut rd, wr, mut buf) = handshake(stream).await;

        // Drop the connection instead of answering
        let ping = read_frame(&mut rd, &mut buf).await;
        assert_eq!(ping.get("Action"), Some("Ping"));
        drop(wr);
        drop(rd);
    });

    let client = ManagerClient::connect(config_for(addr));
    client.ready().await.expect("ready");

    let err = client.submit("Ping", &[]).await.expect_err("connection died");
    assert!(matches!(
        err,
        ManagerError::ConnectionLost | ManagerError::Connection { .. }
    ));

    client.close().await;
    server.abort();
}

#[tokio::test]
async fn auth_failures_degrade_until_manual_reconnect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicU32::new(0));
    let seen = connections.clone();

    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if count <= 3 {
                // Reject the login; the client should back off and retry
                let (mut rd, mut wr) = stream.into_split();
                wr.write_all(b"Asterisk Call Manager/5.0\r\n").await.unwrap();
                let mut buf = MessageBuffer::new();
                let login = read_frame(&mut rd, &mut buf).await;
                let id = login.action_id().unwrap();
                let frame = format!(
                    "Response: Error\r\nActionID: {id}\r\nMessage: Authentication failed\r\n\r\n"
                );
                wr.write_all(frame.as_bytes()).await.unwrap();
            } else {
                tokio::spawn(async move {
                    let (mut rd, _wr, _buf) = handshake(stream).await;
                    let mut chunk = [0u8; 64];
                    while rd.read(&mut chunk).await.unwrap_or(0) > 0 {}
                });
            }
        }
    });

    // max_attempts = 2, so the third consecutive failure degrades the client
    let client = ManagerClient::connect(config_for(addr));
    let mut watch = client.state_watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *watch.borrow() == ConnectionState::Degraded {
                break;
            }
            watch.changed().await.expect("state channel");
        }
    })
    .await
    .expect("client never degraded");
    assert_eq!(connections.load(Ordering::SeqCst), 3);

    // No further automatic attempts while degraded
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 3);

    // Manual reconnect resets the counter and retries immediately
    client.reconnect_now();
    client.ready().await.expect("ready after manual reconnect");

    client.close().await;
    server.abort();
}
