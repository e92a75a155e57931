//! Integration tests for pkg-transport.
//!
//! These tests drive real sockets on ephemeral endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pkg_transport::codec::{CStrCodec, MsgPackCodec};
use pkg_transport::protocol::{build_frame, encode_frame, FrameBuffer, Header, HEADER_SIZE};
use pkg_transport::transport::Stream;
use pkg_transport::{
    ClientBuilder, DispatchTable, Endpoint, PkgError, Server, ServerConfig, Step, MSG_CIAO,
    MSG_DATA, MSG_HELO,
};
use tokio::io::AsyncWriteExt;

fn test_config(endpoint: Endpoint) -> ServerConfig {
    ServerConfig::new(endpoint)
        .accept_wait(Duration::from_millis(20))
        .backoff(Duration::from_millis(5), Duration::from_millis(50))
        .handshake_timeout(Some(Duration::from_secs(5)))
}

fn text_log() -> (Arc<Mutex<Vec<String>>>, impl Fn(&mut pkg_transport::HandlerContext<'_>, bytes::Bytes) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let handler = move |_ctx: &mut pkg_transport::HandlerContext<'_>, payload: bytes::Bytes| {
        sink.lock().unwrap().push(CStrCodec::decode_lossy(&payload).into_owned());
    };
    (log, handler)
}

/// Full session over TCP: greet, two DATA messages, orderly termination.
#[tokio::test]
async fn test_tcp_session_end_to_end() {
    let (server_ciao, server_ciao_handler) = text_log();
    let table = DispatchTable::new().on(MSG_CIAO, "CIAO", server_ciao_handler);
    let mut server = Server::bind(test_config(Endpoint::localhost(0)), table)
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();

    let client = tokio::spawn(async move {
        let (data, data_handler) = text_log();
        let mut conn = ClientBuilder::new()
            .on(MSG_DATA, "DATA", data_handler)
            .connect(&endpoint)
            .await
            .unwrap();

        let ciao = conn.bwaitfor(MSG_CIAO).await.unwrap();
        assert_eq!(CStrCodec::decode(ciao.payload()).unwrap(), "DONE");

        conn.acknowledge_termination("DONE").await.unwrap();
        conn.close().await.unwrap();

        let data = data.lock().unwrap().clone();
        data
    });

    let mut conn = server.accept_client().await.unwrap();
    conn.send_data("msg1").await.unwrap();
    conn.send_data("msg2").await.unwrap();

    let reply = conn.terminate("DONE").await.unwrap();
    assert_eq!(CStrCodec::decode(reply.payload()).unwrap(), "DONE");
    assert_eq!(conn.last_type(), Some(MSG_CIAO));
    conn.close().await.unwrap();

    let received = client.await.unwrap();
    assert_eq!(received, vec!["msg1".to_string(), "msg2".to_string()]);
    // The awaited CIAO is returned, not dispatched
    assert!(server_ciao.lock().unwrap().is_empty());
}

/// A client with the wrong magic is dropped; the next good client is served.
#[tokio::test]
async fn test_wrong_magic_rejected_then_server_continues() {
    let mut server = Server::bind(test_config(Endpoint::localhost(0)), DispatchTable::new())
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();

    let mut bad = Stream::connect(&endpoint).await.unwrap();
    bad.write_all(&encode_frame(MSG_HELO, b"XXXX\0").unwrap())
        .await
        .unwrap();

    let rejected = loop {
        match server.step().await.unwrap() {
            Step::Busy => continue,
            other => break other,
        }
    };
    assert!(matches!(rejected, Step::Rejected { .. }));

    let good = tokio::spawn({
        let endpoint = endpoint.clone();
        async move { ClientBuilder::new().connect(&endpoint).await.unwrap() }
    });

    let conn = server.accept_client().await.unwrap();
    assert_eq!(conn.phase(), pkg_transport::SessionPhase::Established);
    good.await.unwrap();
}

/// A client that disconnects before CIAO surfaces as ConnectionClosed.
#[tokio::test]
async fn test_peer_close_during_wait() {
    let mut server = Server::bind(test_config(Endpoint::localhost(0)), DispatchTable::new())
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();

    let client = tokio::spawn(async move {
        let conn = ClientBuilder::new().connect(&endpoint).await.unwrap();
        conn.close().await.unwrap();
    });

    let mut conn = server.accept_client().await.unwrap();
    client.await.unwrap();

    let err = conn.bwaitfor(MSG_CIAO).await.unwrap_err();
    assert!(matches!(err, PkgError::ConnectionClosed));
    assert!(conn.is_closed());
}

/// The same session over a Unix-domain socket.
#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_session() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Endpoint::Unix(dir.path().join("pkg.sock"));

    let mut server = Server::bind(test_config(endpoint.clone()), DispatchTable::new())
        .await
        .unwrap();

    let client = tokio::spawn(async move {
        let mut conn = ClientBuilder::new().connect(&endpoint).await.unwrap();
        let msg = conn.bwaitfor(MSG_DATA).await.unwrap();
        conn.acknowledge_termination("DONE").await.unwrap();
        conn.close().await.unwrap();
        CStrCodec::decode(msg.payload()).unwrap().to_string()
    });

    let mut conn = server.accept_client().await.unwrap();
    assert!(conn.peer().starts_with("unix:"));
    conn.send_data("over a unix socket").await.unwrap();
    conn.bwaitfor(MSG_CIAO).await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(client.await.unwrap(), "over a unix socket");
}

/// Streamed frames and two-part sends arrive in FIFO order.
#[tokio::test]
async fn test_stream_flush_and_send2_ordering() {
    let mut server = Server::bind(test_config(Endpoint::localhost(0)), DispatchTable::new())
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();

    let client = tokio::spawn(async move {
        let (data, data_handler) = text_log();
        let mut conn = ClientBuilder::new()
            .on(MSG_DATA, "DATA", data_handler)
            .connect(&endpoint)
            .await
            .unwrap();
        conn.run_until(MSG_CIAO).await.unwrap();
        conn.close().await.unwrap();
        let data = data.lock().unwrap().clone();
        data
    });

    let mut conn = server.accept_client().await.unwrap();
    conn.stream(MSG_DATA, &CStrCodec::encode("one")).await.unwrap();
    conn.stream(MSG_DATA, &CStrCodec::encode("two")).await.unwrap();
    conn.send2(MSG_DATA, b"thr", b"ee\0").await.unwrap();
    conn.stream(MSG_CIAO, &CStrCodec::encode("DONE")).await.unwrap();
    conn.flush().await.unwrap();

    let received = client.await.unwrap();
    assert_eq!(received, vec!["one", "two", "three"]);
    conn.close().await.unwrap();
}

/// Concurrent sessions each get their own task.
#[tokio::test]
async fn test_serve_until_handles_concurrent_clients() {
    let config = test_config(Endpoint::localhost(0)).max_sessions(4);
    let mut server = Server::bind(config, DispatchTable::new()).await.unwrap();
    let endpoint = server.local_endpoint().clone();

    let served = Arc::new(AtomicUsize::new(0));
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let counter = served.clone();
    let server_task = tokio::spawn(async move {
        server
            .serve_until(
                async {
                    let _ = stop_rx.await;
                },
                move |mut conn| {
                    let counter = counter.clone();
                    async move {
                        conn.send_data("hello").await?;
                        conn.terminate("DONE").await?;
                        counter.fetch_add(1, Ordering::SeqCst);
                        conn.close().await
                    }
                },
            )
            .await
    });

    let mut clients = Vec::new();
    for _ in 0..3 {
        let endpoint = endpoint.clone();
        clients.push(tokio::spawn(async move {
            let mut conn = ClientBuilder::new().connect(&endpoint).await.unwrap();
            let data = conn.bwaitfor(MSG_DATA).await.unwrap();
            assert_eq!(CStrCodec::decode(data.payload()).unwrap(), "hello");
            conn.bwaitfor(MSG_CIAO).await.unwrap();
            conn.acknowledge_termination("DONE").await.unwrap();
            conn.close().await.unwrap();
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    stop_tx.send(()).unwrap();
    server_task.await.unwrap().unwrap();
    assert_eq!(served.load(Ordering::SeqCst), 3);
}

/// A silent client waiting on its HELO does not hold up other clients.
#[tokio::test]
async fn test_serve_until_silent_client_does_not_block_accept() {
    let config = test_config(Endpoint::localhost(0))
        .handshake_timeout(Some(Duration::from_secs(3)))
        .max_sessions(4);
    let mut server = Server::bind(config, DispatchTable::new()).await.unwrap();
    let endpoint = server.local_endpoint().clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        server
            .serve_until(
                async {
                    let _ = stop_rx.await;
                },
                |mut conn| async move {
                    conn.send_data("hello").await?;
                    conn.close().await
                },
            )
            .await
    });

    // Connects but never says HELO
    let silent = Stream::connect(&endpoint).await.unwrap();

    let greeted = tokio::time::timeout(Duration::from_secs(1), async {
        let mut conn = ClientBuilder::new().connect(&endpoint).await.unwrap();
        let data = conn.bwaitfor(MSG_DATA).await.unwrap();
        conn.close().await.unwrap();
        CStrCodec::decode(data.payload()).unwrap().to_string()
    })
    .await
    .expect("second client waited behind the silent one");
    assert_eq!(greeted, "hello");

    drop(silent);
    stop_tx.send(()).unwrap();
    server_task.await.unwrap().unwrap();
}

/// A hand-written suckin/process loop makes progress on a real socket.
#[tokio::test]
async fn test_suckin_process_loop_over_tcp() {
    let mut server = Server::bind(test_config(Endpoint::localhost(0)), DispatchTable::new())
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();

    let server_side = tokio::spawn(async move {
        let mut conn = server.accept_client().await.unwrap();
        conn.send_data("msg1").await.unwrap();
        conn.bwaitfor(MSG_CIAO).await.unwrap();
        conn.close().await.unwrap();
    });

    let (data, data_handler) = text_log();
    let mut conn = ClientBuilder::new()
        .on(MSG_DATA, "DATA", data_handler)
        .connect(&endpoint)
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            conn.suckin().await.unwrap();
            let n = conn.process().unwrap();
            if n > 0 {
                break n;
            }
        }
    })
    .await
    .expect("polling loop never saw the server's message");
    assert_eq!(delivered, 1);
    assert_eq!(*data.lock().unwrap(), vec!["msg1".to_string()]);

    conn.acknowledge_termination("DONE").await.unwrap();
    conn.close().await.unwrap();
    server_side.await.unwrap();
}

/// Full frame encode/decode cycle with a MsgPack payload.
#[test]
fn test_frame_with_msgpack_payload() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Region {
        name: String,
        volume: f64,
    }

    let region = Region {
        name: "hull".to_string(),
        volume: 3.5,
    };
    let payload = MsgPackCodec::encode(&region).unwrap();
    let frame = build_frame(&Header::new(MSG_DATA, payload.len() as u32), &payload);
    assert_eq!(frame.len(), HEADER_SIZE + payload.len());

    let mut buffer = FrameBuffer::new();
    buffer.extend(&frame);
    let message = buffer.try_take_message().unwrap().unwrap();
    assert_eq!(message.msg_type(), MSG_DATA);
    assert!(buffer.try_take_message().unwrap().is_none());

    let decoded: Region = MsgPackCodec::decode(message.payload()).unwrap();
    assert_eq!(decoded, region);
}

/// Fragmented frames parse the same as whole ones.
#[test]
fn test_fragmented_frame_parsing() {
    let mut wire = encode_frame(MSG_DATA, b"fragmented payload\0").unwrap();
    wire.extend(encode_frame(MSG_CIAO, b"DONE\0").unwrap());

    let mut buffer = FrameBuffer::new();
    let mut messages = Vec::new();
    for chunk in wire.chunks(3) {
        buffer.extend(chunk);
        while let Some(msg) = buffer.try_take_message().unwrap() {
            messages.push(msg);
        }
    }

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].payload(), b"fragmented payload\0");
    assert_eq!(messages[1].msg_type(), MSG_CIAO);
    assert!(buffer.is_empty());
}
