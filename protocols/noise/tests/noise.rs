use async_std::task;
use strand_core::identity::Keypair;
use strand_core::secure_io::SecureInfo;
use strand_core::transport::memory::MemorySocket;
use strand_noise::NoiseConfig;
use strand_traits::{ReadEx, WriteEx};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn handshake_authenticates_both_peers() {
    init_log();
    task::block_on(async {
        let client_key = Keypair::generate_ed25519();
        let server_key = Keypair::generate_ed25519();
        let client_id = client_key.public().into_peer_id();
        let server_id = server_key.public().into_peer_id();

        let (a, b) = MemorySocket::unbounded_pair();

        let server = task::spawn({
            let server_key = server_key.clone();
            async move { NoiseConfig::new(server_key).handshake_inbound(b).await.unwrap() }
        });

        let client_out = NoiseConfig::new(client_key).handshake_outbound(a).await.unwrap();
        let server_out = server.await;

        assert_eq!(client_out.remote_peer(), server_id);
        assert_eq!(server_out.remote_peer(), client_id);
        assert_eq!(client_out.local_peer(), client_id);
    });
}

#[test]
fn echo_various_sizes() {
    init_log();
    task::block_on(async {
        let (a, b) = MemorySocket::unbounded_pair();

        let server = task::spawn(async move {
            let mut out = NoiseConfig::new(Keypair::generate_ed25519())
                .handshake_inbound(b)
                .await
                .unwrap();
            let mut total = 0usize;
            let mut buf = vec![0u8; 8192];
            loop {
                let n = out.read2(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                out.write_all2(&buf[..n]).await.unwrap();
                total += n;
            }
            total
        });

        let mut out = NoiseConfig::new(Keypair::generate_ed25519())
            .handshake_outbound(a)
            .await
            .unwrap();

        let mut sent = 0usize;
        for size in [1usize, 17, 1000, 4096] {
            let msg: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
            out.write_all2(&msg).await.unwrap();
            let mut echoed = vec![0u8; size];
            out.read_exact2(&mut echoed).await.unwrap();
            assert_eq!(echoed, msg);
            sent += size;
        }
        out.close2().await.unwrap();
        assert_eq!(server.await, sent);
    });
}

// A write larger than a single noise record must be split by the sender
// and reassemble intact on the other side.
#[test]
fn large_write_is_chunked_into_records() {
    init_log();
    task::block_on(async {
        let (a, b) = MemorySocket::unbounded_pair();

        let server = task::spawn(async move {
            let mut out = NoiseConfig::new(Keypair::generate_ed25519())
                .handshake_inbound(b)
                .await
                .unwrap();
            let mut received = Vec::new();
            let mut buf = vec![0u8; 16384];
            loop {
                let n = out.read2(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        let mut out = NoiseConfig::new(Keypair::generate_ed25519())
            .handshake_outbound(a)
            .await
            .unwrap();
        let payload: Vec<u8> = (0..200_000usize).map(|i| (i * 31 % 256) as u8).collect();
        out.write_all2(&payload).await.unwrap();
        out.close2().await.unwrap();

        assert_eq!(server.await, payload);
    });
}

// Rapid back-to-back writes must produce records with strictly
// sequential nonces: the receiver decrypts all of them only if the
// sender never reordered or skipped a nonce.
#[test]
fn burst_of_records_decrypts_in_order() {
    init_log();
    task::block_on(async {
        let (a, b) = MemorySocket::unbounded_pair();

        let client = task::spawn(async move {
            let mut out = NoiseConfig::new(Keypair::generate_ed25519())
                .handshake_outbound(a)
                .await
                .unwrap();
            for i in 0..100u32 {
                let msg = vec![(i % 256) as u8; 1024];
                out.write_all2(&msg).await.unwrap();
            }
            out.close2().await.unwrap();
        });

        let mut out = NoiseConfig::new(Keypair::generate_ed25519())
            .handshake_inbound(b)
            .await
            .unwrap();

        // Only start draining after the sender is done: all 100 records
        // are queued by now.
        client.await;

        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = out.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received.len(), 100 * 1024);
        for (i, chunk) in received.chunks(1024).enumerate() {
            assert!(chunk.iter().all(|b| *b == (i % 256) as u8));
        }
    });
}

// A relay that flips one ciphertext byte of the first transport record.
// The receiver must fail the read with an integrity error rather than
// deliver corrupt plaintext.
#[test]
fn tampered_record_fails_integrity_check() {
    init_log();

    async fn copy_record<R: ReadEx, W: WriteEx>(
        from: &mut R,
        to: &mut W,
        tamper: bool,
    ) -> std::io::Result<()> {
        let mut len_buf = [0u8; 2];
        from.read_exact2(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut record = vec![0u8; len];
        from.read_exact2(&mut record).await?;
        if tamper {
            if let Some(last) = record.last_mut() {
                *last ^= 0x01;
            }
        }
        to.write_all2(&len_buf).await?;
        to.write_all2(&record).await?;
        Ok(())
    }

    task::block_on(async {
        let (client_sock, mut client_relay) = MemorySocket::unbounded_pair();
        let (server_sock, mut server_relay) = MemorySocket::unbounded_pair();

        // client -> server: e, then (s, se), then the tampered data record
        let forward = task::spawn(async move {
            copy_record(&mut client_relay, &mut server_relay, false).await.unwrap();
            copy_record(&mut server_relay, &mut client_relay, false).await.unwrap();
            copy_record(&mut client_relay, &mut server_relay, false).await.unwrap();
            copy_record(&mut client_relay, &mut server_relay, true).await.unwrap();
        });

        let server = task::spawn(async move {
            let mut out = NoiseConfig::new(Keypair::generate_ed25519())
                .handshake_inbound(server_sock)
                .await
                .unwrap();
            let mut buf = vec![0u8; 256];
            out.read2(&mut buf).await
        });

        let mut out = NoiseConfig::new(Keypair::generate_ed25519())
            .handshake_outbound(client_sock)
            .await
            .unwrap();
        out.write_all2(b"integrity protected").await.unwrap();

        forward.await;
        let res = server.await;
        assert!(res.is_err(), "tampered record must not decrypt: {:?}", res);
    });
}
