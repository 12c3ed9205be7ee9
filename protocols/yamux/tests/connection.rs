use async_std::task;
use futures_timer::Delay;
use strand_core::transport::memory::MemorySocket;
use strand_traits::{ReadEx, WriteEx};
use strand_yamux::connection::{Connection, Control, Mode};
use strand_yamux::error::ConnectionError;
use strand_yamux::Config;
use std::time::{Duration, Instant};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Spawns both session loops over an in-memory pipe and hands back the
/// two control handles.
fn setup(client_cfg: Config, server_cfg: Config) -> (Control, Control) {
    let (a, b) = MemorySocket::unbounded_pair();

    let mut client = Connection::new(a, client_cfg, Mode::Client);
    let client_ctrl = client.control();
    task::spawn(async move {
        let _ = client.run().await;
    });

    let mut server = Connection::new(b, server_cfg, Mode::Server);
    let server_ctrl = server.control();
    task::spawn(async move {
        let _ = server.run().await;
    });

    (client_ctrl, server_ctrl)
}

async fn read_to_end(stream: &mut strand_yamux::connection::Stream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stream.read2(&mut buf).await.unwrap();
        if n == 0 {
            return received;
        }
        received.extend_from_slice(&buf[..n]);
    }
}

// Half-close preserves in-flight data: everything written before FIN is
// delivered, then reads return empty, repeatedly and without error.
#[test]
fn half_close_preserves_in_flight_data() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            let received = read_to_end(&mut stream).await;
            // EOF is sticky
            let mut buf = [0u8; 16];
            assert_eq!(stream.read2(&mut buf).await.unwrap(), 0);
            received
        });

        let data = pattern(64 * 1024);
        let mut stream = client.open_stream().await.unwrap();
        for chunk in data.chunks(8 * 1024) {
            stream.write_all2(chunk).await.unwrap();
        }
        stream.close2().await.unwrap();

        assert_eq!(server_task.await, data);
    });
}

// A read that is already pending resolves once data arrives, and EOF
// follows after the peer's half-close.
#[test]
fn pending_read_resolves_on_data_then_eof() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            // goes pending first, the client writes only later
            let mut buf = vec![0u8; 2048];
            let n = stream.read2(&mut buf).await.unwrap();
            assert!(n >= 1);
            let mut received = buf[..n].to_vec();
            received.extend(read_to_end(&mut stream).await);
            received
        });

        let mut stream = client.open_stream().await.unwrap();
        Delay::new(Duration::from_millis(200)).await;
        stream.write_all2(&pattern(1000)).await.unwrap();
        stream.close2().await.unwrap();

        assert_eq!(server_task.await, pattern(1000));
    });
}

// Bulk transfer against a small window: completes, in order, without
// deadlock, while the receiver drains in small chunks.
#[test]
fn flow_control_under_bulk_transfer() {
    init_log();
    task::block_on(async {
        let mut cfg = Config::default();
        cfg.set_initial_window(64 * 1024).set_max_message_size(4 * 1024);
        let (mut client, mut server) = setup(cfg.clone(), cfg);

        let total = 500 * 1024;
        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            let mut received = Vec::new();
            let mut buf = vec![0u8; 4 * 1024];
            loop {
                let n = stream.read2(&mut buf).await.unwrap();
                if n == 0 {
                    return received;
                }
                received.extend_from_slice(&buf[..n]);
            }
        });

        let data = pattern(total);
        let mut stream = client.open_stream().await.unwrap();
        stream.write_all2(&data).await.unwrap();
        stream.close2().await.unwrap();

        let received = server_task.await;
        assert_eq!(received.len(), total);
        assert_eq!(received, data);
    });
}

// A reset racing with a pending read: the read observes EOF (not an
// error), and subsequent writes fail.
#[test]
fn reset_races_with_pending_read() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            let mut buf = [0u8; 64];
            // pending read resolves empty on RST
            assert_eq!(stream.read2(&mut buf).await.unwrap(), 0);
            assert!(stream.is_reset());
            let err = stream.write2(b"too late").await.unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        });

        let mut stream = client.open_stream().await.unwrap();
        Delay::new(Duration::from_millis(200)).await;
        stream.reset().await.unwrap();

        server_task.await;
    });
}

// GO_AWAY drains existing streams: buffered data still reaches reads,
// new streams are refused, and the closing side completes once all
// streams finished.
#[test]
fn go_away_drains_existing_streams() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let data = pattern(10 * 1024);
        let mut stream = client.open_stream().await.unwrap();
        stream.write_all2(&data).await.unwrap();
        stream.close2().await.unwrap();

        let mut closer = client.clone();
        let close_task = task::spawn(async move { closer.close().await });

        // let the GO_AWAY reach the server
        Delay::new(Duration::from_millis(200)).await;
        assert!(matches!(
            server.open_stream().await,
            Err(ConnectionError::Closed)
        ));

        // the already open stream still delivers everything
        let mut accepted = server.accept_stream().await.unwrap();
        let received = read_to_end(&mut accepted).await;
        assert_eq!(received, data);
        accepted.close2().await.unwrap();

        close_task.await.unwrap();

        // new local streams are refused as well
        assert!(matches!(
            client.open_stream().await,
            Err(ConnectionError::Closed)
        ));
    });
}

#[test]
fn ping_roundtrip_and_after_close() {
    init_log();
    task::block_on(async {
        let (mut client, _server) = setup(Config::default(), Config::default());

        let rtt = client.ping().await.unwrap();
        assert!(rtt < Duration::from_secs(5));

        client.close().await.unwrap();
        assert!(client.ping().await.is_err());
        assert!(client.is_closed());
    });
}

#[test]
fn too_many_streams_is_recoverable() {
    init_log();
    task::block_on(async {
        let mut cfg = Config::default();
        cfg.set_max_num_streams(4);
        let (mut client, _server) = setup(cfg, Config::default());

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(client.open_stream().await.unwrap());
        }
        assert!(matches!(
            client.open_stream().await,
            Err(ConnectionError::TooManyStreams)
        ));

        // closing one frees a slot
        held[0].close2().await.unwrap();
        held[0].reset().await.unwrap();
        Delay::new(Duration::from_millis(200)).await;
        assert!(client.open_stream().await.is_ok());
    });
}

// A write blocked on the send window for longer than the write timeout
// resets the stream and fails with a timeout.
#[test]
fn blocked_write_times_out_and_resets() {
    init_log();
    task::block_on(async {
        let mut cfg = Config::default();
        cfg.set_initial_window(16 * 1024)
            .set_write_timeout(Duration::from_millis(300));
        let (mut client, mut server) = setup(cfg.clone(), cfg);

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            // never read: the client's window stays exhausted
            let mut buf = [0u8; 1];
            stream.set_read_deadline(Some(Instant::now() + Duration::from_secs(10)));
            let _ = stream.read2(&mut buf).await;
        });

        let mut stream = client.open_stream().await.unwrap();
        let started = Instant::now();
        let err = stream.write_all2(&pattern(40 * 1024)).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(stream.is_reset());

        server_task.await;
    });
}

#[test]
fn read_deadline_fires_without_disturbing_the_stream() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            Delay::new(Duration::from_millis(400)).await;
            stream.write_all2(b"finally").await.unwrap();
            stream.close2().await.unwrap();
        });

        let mut stream = client.open_stream().await.unwrap();
        stream.set_read_deadline(Some(Instant::now() + Duration::from_millis(100)));
        let mut buf = [0u8; 16];
        let err = stream.read2(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

        // the deadline did not kill the stream
        stream.set_read_deadline(None);
        let n = stream.read_exact2(&mut buf[..7]).await;
        assert!(n.is_ok());
        assert_eq!(&buf[..7], b"finally");

        server_task.await;
    });
}

#[test]
fn close_and_half_close_are_idempotent() {
    init_log();
    task::block_on(async {
        let (mut client, _server) = setup(Config::default(), Config::default());

        let mut stream = client.open_stream().await.unwrap();
        stream.close2().await.unwrap();
        stream.close2().await.unwrap();
        let err = stream.write2(b"x").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WriteZero);

        let mut stream2 = client.open_stream().await.unwrap();
        stream2.reset().await.unwrap();
        stream2.reset().await.unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();
    });
}

#[test]
fn zero_length_io_is_a_no_op() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let server_task = task::spawn(async move {
            let mut stream = server.accept_stream().await.unwrap();
            let received = read_to_end(&mut stream).await;
            assert_eq!(received, b"real data");
        });

        let mut stream = client.open_stream().await.unwrap();
        assert_eq!(stream.write2(&[]).await.unwrap(), 0);
        // read(0) resolves immediately even though nothing is buffered
        assert_eq!(stream.read2(&mut []).await.unwrap(), 0);
        stream.write_all2(b"real data").await.unwrap();
        stream.close2().await.unwrap();

        server_task.await;
    });
}

// Stream ids: client-opened streams are odd, server-opened even, both
// strictly increasing; inbound streams are accepted in SYN order.
#[test]
fn stream_id_parity_and_accept_order() {
    init_log();
    task::block_on(async {
        let (mut client, mut server) = setup(Config::default(), Config::default());

        let s1 = client.open_stream().await.unwrap();
        let s2 = client.open_stream().await.unwrap();
        let s3 = client.open_stream().await.unwrap();
        assert_eq!(s1.id().val(), 1);
        assert_eq!(s2.id().val(), 3);
        assert_eq!(s3.id().val(), 5);

        for expected in [1u32, 3, 5] {
            let accepted = server.accept_stream().await.unwrap();
            assert_eq!(accepted.id().val(), expected);
        }

        let server_stream = server.open_stream().await.unwrap();
        assert_eq!(server_stream.id().val(), 2);
    });
}

// Many concurrent echo streams over one session, each with its own
// lifecycle, over the in-memory transport.
#[test]
fn concurrent_echo_streams() {
    init_log();
    task::block_on(async {
        let (client, mut server) = setup(Config::default(), Config::default());

        task::spawn(async move {
            while let Ok(mut stream) = server.accept_stream().await {
                task::spawn(async move {
                    let received = read_to_end(&mut stream).await;
                    stream.write_all2(&received).await.unwrap();
                    stream.close2().await.unwrap();
                });
            }
        });

        let data = std::sync::Arc::new(pattern(10 * 1024));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let mut client = client.clone();
            let data = data.clone();
            handles.push(task::spawn(async move {
                let mut stream = client.open_stream().await.unwrap();
                stream.write_all2(&data).await.unwrap();
                stream.close2().await.unwrap();
                let echoed = read_to_end(&mut stream).await;
                assert_eq!(&echoed, data.as_ref());
            }));
        }
        for handle in handles {
            handle.await;
        }
    });
}

// A session whose keep-alive probes go unanswered terminates with
// a keep-alive error.
#[test]
fn keep_alive_detects_dead_peer() {
    init_log();
    task::block_on(async {
        let (a, b) = MemorySocket::unbounded_pair();

        let mut cfg = Config::default();
        cfg.set_keep_alive_interval(Duration::from_millis(100));
        let mut client = Connection::new(a, cfg, Mode::Client);
        let handle = task::spawn(async move { client.run().await });

        // the peer exists but its event loop never runs, so nothing
        // answers our pings
        let _dead_peer = Connection::new(b, Config::default(), Mode::Server);

        let res = handle.await;
        assert!(matches!(res, Err(ConnectionError::KeepAliveTimeout)));
    });
}

mod raw {
    use super::*;

    fn encode_header(tag: u8, flags: u16, stream_id: u32, length: u32) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[1] = tag;
        buf[2..4].copy_from_slice(&flags.to_be_bytes());
        buf[4..8].copy_from_slice(&stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&length.to_be_bytes());
        buf
    }

    async fn read_header<R: ReadEx>(io: &mut R) -> [u8; 12] {
        let mut buf = [0u8; 12];
        io.read_exact2(&mut buf).await.unwrap();
        buf
    }

    // A window update for an unknown stream is ignored, not fatal: the
    // session still answers pings afterwards.
    #[test]
    fn window_update_for_unknown_stream_is_ignored() {
        init_log();
        task::block_on(async {
            let (a, mut raw) = MemorySocket::unbounded_pair();

            let mut cfg = Config::default();
            cfg.set_keep_alive_interval(Duration::ZERO);
            let mut session = Connection::new(a, cfg, Mode::Client);
            task::spawn(async move {
                let _ = session.run().await;
            });

            // WINDOW_UPDATE for a stream that never existed
            raw.write_all2(&encode_header(1, 0, 99, 4096)).await.unwrap();
            // then a ping that must still be answered
            raw.write_all2(&encode_header(2, 1, 0, 7)).await.unwrap();

            let pong = read_header(&mut raw).await;
            assert_eq!(pong[1], 2); // PING
            assert_eq!(u16::from_be_bytes([pong[2], pong[3]]), 2); // ACK
            assert_eq!(u32::from_be_bytes([pong[8], pong[9], pong[10], pong[11]]), 7);
        });
    }

    // A frame with an unknown version kills the session with
    // GO_AWAY(protocol error).
    #[test]
    fn malformed_frame_produces_go_away() {
        init_log();
        task::block_on(async {
            let (a, mut raw) = MemorySocket::unbounded_pair();

            let mut cfg = Config::default();
            cfg.set_keep_alive_interval(Duration::ZERO);
            let mut session = Connection::new(a, cfg, Mode::Client);
            let mut ctrl = session.control();
            let handle = task::spawn(async move { session.run().await });

            let mut bad = encode_header(0, 0, 1, 0);
            bad[0] = 42; // bogus version
            raw.write_all2(&bad).await.unwrap();

            let go_away = read_header(&mut raw).await;
            assert_eq!(go_away[1], 3); // GO_AWAY
            assert_eq!(
                u32::from_be_bytes([go_away[8], go_away[9], go_away[10], go_away[11]]),
                1 // protocol error
            );

            assert!(handle.await.is_err());
            assert!(matches!(
                ctrl.open_stream().await,
                Err(ConnectionError::Closed)
            ));
        });
    }
}
