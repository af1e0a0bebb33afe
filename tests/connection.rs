use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};

use respio::reply::OK;
use respio::{args, Config, Connection, Error, ProtocolError, Reply};

async fn create_tcp_connection() -> Result<(UnboundedSender<Vec<u8>>, TcpStream), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local_addr = listener.local_addr()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            while let Some(data) = rx.recv().await {
                // Write the received channel data to the socket.
                if socket.write_all(&data).await.is_err() {
                    break;
                }
            }
        }
    });

    // Connect to the server as a client to complete the setup.
    let stream = TcpStream::connect(local_addr).await?;

    Ok((tx, stream))
}

fn create_duplex_connection(config: Config) -> (Connection<DuplexStream>, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);

    (Connection::with_config(client, config), server)
}

async fn expect_bytes(server: &mut DuplexStream, expected: &[u8]) {
    let mut buf = vec![0; expected.len()];
    server.read_exact(&mut buf).await.unwrap();

    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn test_receive_status() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"+OK\r\n".to_vec()).unwrap();

    let actual = connection.receive().await.unwrap();

    assert_eq!(actual, OK);
    assert!(matches!(actual, Reply::Status(Cow::Borrowed("OK"))));
}

#[tokio::test]
async fn test_receive_bulk_string() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"$5\r\nhello\r\n".to_vec()).unwrap();

    let actual = connection.receive().await.unwrap();

    assert_eq!(actual, Reply::Bulk(Bytes::from("hello")));
}

#[tokio::test]
async fn test_receive_array() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let connection = Connection::new(tcp_stream);

    tcp_stream_tx
        .send(b"*3\r\n$3\r\nfoo\r\n$-1\r\n:7\r\n".to_vec())
        .unwrap();

    let actual = connection.receive().await.unwrap();
    let expected = Reply::Array(vec![
        Reply::Bulk(Bytes::from("foo")),
        Reply::Nil,
        Reply::Integer(7),
    ]);

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_receive_reply_split_across_writes() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"*2\r\n$5\r\nhel".to_vec()).unwrap();
    tcp_stream_tx.send(b"lo\r\n:".to_vec()).unwrap();
    tcp_stream_tx.send(b"1\r\n".to_vec()).unwrap();

    let actual = connection.receive().await.unwrap();
    let expected = Reply::Array(vec![Reply::Bulk(Bytes::from("hello")), Reply::Integer(1)]);

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_null_replies_are_nil() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let connection = Connection::new(tcp_stream);

    tcp_stream_tx.send(b"$-1\r\n*-1\r\n*0\r\n".to_vec()).unwrap();

    assert_eq!(connection.receive().await.unwrap(), Reply::Nil);
    assert_eq!(connection.receive().await.unwrap(), Reply::Nil);
    assert_eq!(connection.receive().await.unwrap(), Reply::Array(vec![]));
}

#[tokio::test]
async fn test_pipelined_replies_come_back_in_order() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send("SET", &args!["a", 1]).await.unwrap();
    connection.send("BOGUS", &[]).await.unwrap();
    connection.send("INCR", &args!["n"]).await.unwrap();
    assert_eq!(connection.pending(), 3);

    connection.flush().await.unwrap();
    expect_bytes(
        &mut server,
        b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*1\r\n$5\r\nBOGUS\r\n*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n",
    )
    .await;

    server
        .write_all(b"+OK\r\n-ERR unknown command\r\n:3\r\n")
        .await
        .unwrap();

    assert_eq!(connection.receive().await.unwrap(), OK);
    assert!(matches!(
        connection.receive().await,
        Err(Error::Server(ref msg)) if msg == "ERR unknown command"
    ));
    assert_eq!(connection.receive().await.unwrap(), Reply::Integer(3));

    assert_eq!(connection.pending(), 0);
    // An error reply doesn't break the connection.
    assert!(connection.err().is_none());
}

#[tokio::test]
async fn test_nothing_is_written_before_flush() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send("PING", &[]).await.unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(20), server.read(&mut buf)).await;
    assert!(read.is_err());

    connection.flush().await.unwrap();
    expect_bytes(&mut server, b"*1\r\n$4\r\nPING\r\n").await;
}

#[tokio::test]
async fn test_do_command() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    server.write_all(b"$3\r\nbar\r\n").await.unwrap();

    let outcome = connection.do_command("GET", &args!["foo"]).await.unwrap();
    expect_bytes(&mut server, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;

    assert_eq!(outcome.reply, Reply::Bulk(Bytes::from("bar")));
    assert!(outcome.error.is_none());
    assert_eq!(connection.pending(), 0);
}

#[tokio::test]
async fn test_do_command_drains_pending_and_keeps_first_error() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send("A", &[]).await.unwrap();
    connection.send("B", &[]).await.unwrap();

    server
        .write_all(b"-ERR first\r\n-ERR second\r\n:42\r\n")
        .await
        .unwrap();

    let outcome = connection.do_command("C", &[]).await.unwrap();
    expect_bytes(
        &mut server,
        b"*1\r\n$1\r\nA\r\n*1\r\n$1\r\nB\r\n*1\r\n$1\r\nC\r\n",
    )
    .await;

    assert_eq!(outcome.reply, Reply::Integer(42));
    assert!(matches!(
        outcome.error,
        Some(Error::Server(ref msg)) if msg == "ERR first"
    ));
    assert!(matches!(
        outcome.into_result(),
        Err(Error::Server(ref msg)) if msg == "ERR first"
    ));
    assert_eq!(connection.pending(), 0);
}

#[tokio::test]
async fn test_do_command_last_reply_is_an_error() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    server.write_all(b"-WRONGTYPE no\r\n").await.unwrap();

    let outcome = connection.do_command("INCR", &args!["list"]).await.unwrap();

    assert_eq!(outcome.reply, Reply::Error("WRONGTYPE no".to_string()));
    assert!(matches!(outcome.error, Some(Error::Server(_))));
}

#[tokio::test]
async fn test_do_pending() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    // Nothing pending, nothing to do.
    assert_eq!(connection.do_pending().await.unwrap(), Reply::Nil);

    connection.send("PING", &[]).await.unwrap();
    connection.send("GET", &args!["k"]).await.unwrap();
    server.write_all(b"+PONG\r\n-ERR nope\r\n").await.unwrap();

    let reply = connection.do_pending().await.unwrap();
    expect_bytes(&mut server, b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;

    assert_eq!(
        reply,
        Reply::Array(vec![
            respio::reply::PONG,
            Reply::Error("ERR nope".to_string())
        ])
    );
    assert_eq!(connection.pending(), 0);
}

#[tokio::test]
async fn test_send_status_and_error() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send_status("OK").await.unwrap();
    expect_bytes(&mut server, b"+OK\r\n").await;

    connection.send_error("ERR something").await.unwrap();
    expect_bytes(&mut server, b"-ERR something\r\n").await;

    assert_eq!(connection.pending(), 0);
}

#[tokio::test]
async fn test_close_is_sticky() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    assert!(connection.err().is_none());
    connection.close().await.unwrap();

    assert!(matches!(connection.err(), Some(Error::Closed)));
    assert!(matches!(connection.close().await, Err(Error::Closed)));
    assert!(matches!(connection.send("PING", &[]).await, Err(Error::Closed)));
    assert!(matches!(connection.flush().await, Err(Error::Closed)));
    assert!(matches!(connection.receive().await, Err(Error::Closed)));
    assert!(matches!(
        connection.do_command("PING", &[]).await,
        Err(Error::Closed)
    ));
    assert!(matches!(connection.do_pending().await, Err(Error::Closed)));

    // The peer sees end of stream.
    let mut rest = Vec::new();
    server.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_close_drops_unflushed_output() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send("SET", &args!["k", "v"]).await.unwrap();
    connection.close().await.unwrap();

    let mut rest = Vec::new();
    server.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_is_fatal() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    connection.send("BLPOP", &args!["q", 0]).await.unwrap();
    connection.flush().await.unwrap();
    expect_bytes(&mut server, b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n").await;

    let err = connection.receive().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(30)));

    // The stream is closed right away, not on the next call.
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(0))));

    assert!(matches!(connection.err(), Some(Error::Timeout(_))));
    assert!(matches!(connection.send("PING", &[]).await, Err(Error::Timeout(_))));
    assert!(matches!(connection.do_pending().await, Err(Error::Timeout(_))));
    assert!(matches!(connection.close().await, Err(Error::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_write_timeout_is_fatal() {
    let config = Config::default().with_write_timeout(Duration::from_millis(50));
    let (client, mut server) = tokio::io::duplex(8);
    let connection = Connection::with_config(client, config);

    // Far more than the pipe holds, and nobody reads the other end.
    let value = vec![b'x'; 100 * 1024];
    let result = match connection.send("SET", &args!["big", value]).await {
        Ok(()) => connection.flush().await,
        Err(err) => Err(err),
    };
    assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(50)));

    assert!(matches!(connection.err(), Some(Error::Timeout(_))));
    assert!(matches!(connection.flush().await, Err(Error::Timeout(_))));
    assert!(matches!(connection.receive().await, Err(Error::Timeout(_))));

    // Whatever made it into the pipe is followed by end of stream.
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(n)) if n <= 8));
}

#[tokio::test(start_paused = true)]
async fn test_zero_read_timeout_waits() {
    let config = Config::default().with_read_timeout(Duration::ZERO);
    let (connection, mut server) = create_duplex_connection(config);

    let reply = tokio::spawn(async move { connection.receive().await });

    tokio::time::sleep(Duration::from_secs(3600)).await;
    server.write_all(b":1\r\n").await.unwrap();

    assert_eq!(reply.await.unwrap().unwrap(), Reply::Integer(1));
}

#[tokio::test]
async fn test_protocol_error_is_fatal() {
    let (connection, mut server) = create_duplex_connection(Config::default());

    server.write_all(b"?what\r\n+OK\r\n").await.unwrap();

    let err = connection.receive().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::IllegalData(b'?'))
    ));
    assert!(err.to_string().starts_with("protocol error; "));

    // The good reply after it is never read.
    assert!(matches!(
        connection.receive().await,
        Err(Error::Protocol(ProtocolError::IllegalData(b'?')))
    ));
    assert!(matches!(
        connection.close().await,
        Err(Error::Protocol(_))
    ));

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(0))));
}

#[tokio::test]
async fn test_peer_hang_up_is_fatal() {
    let (connection, server) = create_duplex_connection(Config::default());

    drop(server);

    assert!(matches!(connection.receive().await, Err(Error::Io(_))));
    assert!(matches!(connection.err(), Some(Error::Io(_))));
}

#[tokio::test]
async fn test_close_wakes_up_a_blocked_receive() {
    let config = Config::default().with_read_timeout(Duration::ZERO);
    let (connection, _server) = create_duplex_connection(config);
    let connection = Arc::new(connection);

    let receiver = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.receive().await })
    };

    // Let the receive get going.
    tokio::task::yield_now().await;
    connection.close().await.unwrap();

    assert!(matches!(receiver.await.unwrap(), Err(Error::Closed)));
}

#[tokio::test]
async fn test_concurrent_senders() {
    let (connection, mut server) = create_duplex_connection(Config::default());
    let connection = Arc::new(connection);

    let mut handles = Vec::new();
    for i in 0..8 {
        let connection = connection.clone();
        handles.push(tokio::spawn(async move {
            connection.send("ECHO", &args![i]).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(connection.pending(), 8);

    connection.flush().await.unwrap();

    // Every command arrives whole, whatever the interleaving.
    let mut buf = vec![0; 8 * b"*2\r\n$4\r\nECHO\r\n$1\r\n0\r\n".len()];
    server.read_exact(&mut buf).await.unwrap();
    let mut decoder = respio::Decoder::new(&buf[..]);
    let mut seen = Vec::new();
    for _ in 0..8 {
        let frame = decoder.decode().await.unwrap().unwrap();
        let words = frame.strings().unwrap();
        assert_eq!(words[0], "ECHO");
        seen.push(words[1].parse::<i32>().unwrap());
    }
    seen.sort();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_decoder_and_connection_reject_the_same_input() {
    let inputs: [&[u8]; 6] = [
        b"!3\r\n",
        b"$x\r\n",
        b"*-2\r\n",
        b":12ab\r\n",
        b"$3\r\nfoobar\r\n",
        b"+OK\n",
    ];

    for input in inputs {
        let decoded = respio::decode(&mut &input[..]).await;
        let decoder_err = match decoded {
            Err(Error::Protocol(err)) => err,
            other => panic!("{:?} decoded to {:?}", String::from_utf8_lossy(input), other),
        };

        let (connection, mut server) = create_duplex_connection(Config::default());
        server.write_all(input).await.unwrap();
        let received = connection.receive().await;
        let connection_err = match received {
            Err(Error::Protocol(err)) => err,
            other => panic!("{:?} received as {:?}", String::from_utf8_lossy(input), other),
        };

        assert_eq!(decoder_err, connection_err);
    }
}

#[tokio::test]
async fn test_dial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; b"*1\r\n$4\r\nPING\r\n".len()];
        socket.read_exact(&mut buf).await.unwrap();
        socket.write_all(b"+PONG\r\n").await.unwrap();
        buf
    });

    let connection = Connection::dial(addr.as_str()).await.unwrap();
    assert_eq!(connection.addr(), Some(addr.as_str()));

    let reply = connection.do_command("PING", &[]).await.unwrap().into_result();
    assert_eq!(reply.unwrap(), respio::reply::PONG);
    assert_eq!(server.await.unwrap(), b"*1\r\n$4\r\nPING\r\n");

    connection.close().await.unwrap();
}
