use async_std::task;
use futures_timer::Delay;
use strand::transports::tcp::TcpTransport;
use strand::{
    Keypair, NoiseConfig, PeerStore, TransportError, TransportUpgrade, UpgradedConn, YamuxConfig,
};
use strand_core::multistream::Negotiator;
use strand_core::muxing::{StreamInfo, StreamMuxer};
use strand_core::resource::CountingResourceManager;
use strand_core::transport::memory::MemoryTransport;
use strand_core::transport::{Transport, TransportListener};
use strand_traits::{ReadEx, WriteEx};
use std::sync::Arc;
use std::time::Duration;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn echo_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

async fn run_upgraded_echo<T>(
    listener_transport: TransportUpgrade<T, NoiseConfig, YamuxConfig>,
    dialer_transport: TransportUpgrade<T, NoiseConfig, YamuxConfig>,
    listen_addr: strand::Multiaddr,
    expected_transport: &str,
    client_id: strand::PeerId,
    server_id: strand::PeerId,
) where
    T: Transport + Send + 'static,
    TransportUpgrade<T, NoiseConfig, YamuxConfig>:
        Transport<Output = UpgradedConn<strand_yamux::Yamux>>,
    <TransportUpgrade<T, NoiseConfig, YamuxConfig> as Transport>::Listener: Send + 'static,
{
    let mut listener = listener_transport.listen_on(listen_addr).unwrap();
    let addr = listener.multi_addr();

    let server = task::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        let state = conn.conn_state().clone();
        assert_eq!(state.security_protocol(), "/noise");
        assert_eq!(state.stream_muxer_protocol(), "/yamux/1.0.0");
        assert_eq!(state.remote_peer(), client_id);

        if let Some(background) = conn.task() {
            task::spawn(background);
        }

        let mut stream = conn.accept_stream().await.unwrap();
        stream.set_protocol("/echo/1.0.0");
        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = stream.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        stream.write_all2(&received).await.unwrap();
        stream.close2().await.unwrap();
        state.transport().to_owned()
    });

    let mut conn = dialer_transport.dial(addr).await.unwrap();
    assert_eq!(conn.conn_state().remote_peer(), server_id);
    assert_eq!(conn.conn_state().transport(), expected_transport);

    if let Some(background) = conn.task() {
        task::spawn(background);
    }

    let payload = echo_payload(48 * 1024);
    let mut stream = conn.open_stream().await.unwrap();
    stream.write_all2(&payload).await.unwrap();
    stream.close2().await.unwrap();

    let mut echoed = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read2(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        echoed.extend_from_slice(&buf[..n]);
    }
    assert_eq!(echoed, payload);

    assert_eq!(server.await, expected_transport);

    conn.close().await.unwrap();
    Delay::new(Duration::from_millis(200)).await;
    assert!(conn.is_closed());
}

#[test]
fn upgrade_and_echo_over_memory() {
    init_log();
    task::block_on(async {
        let client_key = Keypair::generate_ed25519();
        let server_key = Keypair::generate_ed25519();
        let client_id = client_key.public().into_peer_id();
        let server_id = server_key.public().into_peer_id();

        let listener_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(server_key),
            YamuxConfig::default(),
        );
        let dialer_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(client_key),
            YamuxConfig::default(),
        );

        run_upgraded_echo(
            listener_transport,
            dialer_transport,
            "/memory/0".parse().unwrap(),
            "memory",
            client_id,
            server_id,
        )
        .await;
    });
}

#[test]
fn upgrade_and_echo_over_tcp() {
    init_log();
    task::block_on(async {
        let client_key = Keypair::generate_ed25519();
        let server_key = Keypair::generate_ed25519();
        let client_id = client_key.public().into_peer_id();
        let server_id = server_key.public().into_peer_id();

        let listener_transport = TransportUpgrade::new(
            TcpTransport,
            NoiseConfig::new(server_key),
            YamuxConfig::default(),
        );
        let dialer_transport = TransportUpgrade::new(
            TcpTransport,
            NoiseConfig::new(client_key),
            YamuxConfig::default(),
        );

        run_upgraded_echo(
            listener_transport,
            dialer_transport,
            "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            "tcp",
            client_id,
            server_id,
        )
        .await;
    });
}

#[test]
fn learned_keys_land_in_the_peerstore() {
    init_log();
    task::block_on(async {
        let client_key = Keypair::generate_ed25519();
        let server_key = Keypair::generate_ed25519();
        let server_id = server_key.public().into_peer_id();
        let server_pub = server_key.public();

        let listener_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(server_key),
            YamuxConfig::default(),
        );
        let mut listener = listener_transport.listen_on("/memory/0".parse().unwrap()).unwrap();
        let addr = listener.multi_addr();
        task::spawn(async move {
            let _ = listener.accept().await;
        });

        let store = PeerStore::new();
        let dialer_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(client_key),
            YamuxConfig::default(),
        )
        .with_peerstore(store.clone());

        let _conn = dialer_transport.dial(addr).await.unwrap();
        assert_eq!(store.pub_key(&server_id), Some(server_pub));
    });
}

#[test]
fn dialing_the_wrong_peer_fails() {
    init_log();
    task::block_on(async {
        let listener_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(Keypair::generate_ed25519()),
            YamuxConfig::default(),
        );
        let mut listener = listener_transport.listen_on("/memory/0".parse().unwrap()).unwrap();
        let addr = listener.multi_addr();
        task::spawn(async move {
            // the dialer aborts after the handshake; failure here is expected
            let _ = listener.accept().await;
        });

        let dialer_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(Keypair::generate_ed25519()),
            YamuxConfig::default(),
        );
        let someone_else = Keypair::generate_ed25519().public().into_peer_id();
        let err = dialer_transport
            .dial_expecting(addr, someone_else)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerIdMismatch { .. }));
    });
}

#[test]
fn no_mutual_security_protocol() {
    init_log();
    task::block_on(async {
        let mut listener = MemoryTransport.listen_on("/memory/0".parse().unwrap()).unwrap();
        let addr = listener.multi_addr();
        task::spawn(async move {
            // a responder that only speaks something else
            let mut socket = listener.accept().await.unwrap();
            let negotiator = Negotiator::new_with_protocols(vec!["/tls/1.0.0"]);
            let _ = negotiator.negotiate(&mut socket).await;
        });

        let dialer_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(Keypair::generate_ed25519()),
            YamuxConfig::default(),
        );
        let err = dialer_transport.dial(addr).await.unwrap_err();
        assert!(matches!(err, TransportError::NoMutualSecurity));
    });
}

#[test]
fn resource_manager_can_deny_connections() {
    init_log();
    task::block_on(async {
        let mut listener = MemoryTransport.listen_on("/memory/0".parse().unwrap()).unwrap();
        let addr = listener.multi_addr();
        task::spawn(async move {
            let _ = listener.accept().await;
        });

        let dialer_transport = TransportUpgrade::new(
            MemoryTransport,
            NoiseConfig::new(Keypair::generate_ed25519()),
            YamuxConfig::default(),
        )
        .with_resource_manager(Arc::new(CountingResourceManager::new(0)));

        let err = dialer_transport.dial(addr).await.unwrap_err();
        assert!(matches!(err, TransportError::ResourceLimitExceeded));
    });
}
