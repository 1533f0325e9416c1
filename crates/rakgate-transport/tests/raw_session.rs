//! Integration tests for the raw pass-through session.
//!
//! These tests bind two real UDP sockets on localhost: one plays the
//! listener's shared socket, the other plays the remote peer.

#[cfg(feature = "raw")]
mod raw {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use rakgate_transport::{
        RawSessionFactory, Session, SessionFactory, TransportError,
    };
    use tokio::net::UdpSocket;

    async fn socket_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("should bind");
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("should bind");
        (Arc::new(server), peer)
    }

    #[tokio::test]
    async fn test_raw_session_receive_then_recv_and_send() {
        let (server, peer) = socket_pair().await;
        let peer_addr = peer.local_addr().unwrap();
        let session = RawSessionFactory.create(Arc::clone(&server), peer_addr, 1400, 77);

        assert_eq!(session.remote_addr(), peer_addr);
        assert_eq!(session.mtu(), 1400);
        assert_eq!(session.client_guid(), 77);
        assert!(!session.signals().is_complete());

        // --- Listener forwards a datagram, application reads it ---
        session
            .receive(Bytes::from_static(b"\x84hello"))
            .expect("receive should succeed");
        assert!(
            session.signals().is_complete(),
            "first datagram completes the handshake"
        );
        let got = session
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(&got[..], b"\x84hello");

        // --- Application sends, peer receives ---
        session.send(b"reply").await.expect("send should succeed");
        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(
            Duration::from_secs(1),
            peer.recv_from(&mut buf),
        )
        .await
        .expect("peer should receive in time")
        .unwrap();
        assert_eq!(&buf[..n], b"reply");
        assert_eq!(from, server.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_raw_session_close_ends_recv_and_rejects_io() {
        let (server, peer) = socket_pair().await;
        let session =
            RawSessionFactory.create(server, peer.local_addr().unwrap(), 1400, 1);

        session.close().await.expect("close should succeed");
        // Closing twice is fine.
        session.close().await.expect("second close should succeed");

        assert!(session.signals().is_closed());
        assert!(session.recv().await.unwrap().is_none());
        assert!(matches!(
            session.receive(Bytes::from_static(b"x")),
            Err(TransportError::Closed(_))
        ));
        assert!(matches!(
            session.send(b"x").await,
            Err(TransportError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_raw_session_send_oversized_returns_error() {
        let (server, peer) = socket_pair().await;
        let session =
            RawSessionFactory.create(server, peer.local_addr().unwrap(), 100, 1);

        let result = session.send(&[0u8; 73]).await;

        assert!(matches!(
            result,
            Err(TransportError::Oversized { len: 73, mtu: 100 })
        ));
        session.send(&[0u8; 72]).await.expect("72 bytes fit an MTU of 100");
    }
}
