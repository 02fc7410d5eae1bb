use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use tunmux::{FailReason, SessionError, StreamEvent};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Opening streams
// ══════════════════════════════════════════════════════════════════════════════

/// SYN is answered with OK once the connector returns, and DATA for that
/// stream lands on the connector's queue.
#[tokio::test]
async fn test_syn_opens_stream_and_routes_data() {
    init_tracing();
    let (connector, mut accepted) = accepting(8);
    let (session, mut peer) = raw_pair(Session::builder().connector(connector));

    peer.send(&Frame::Syn {
        stream_id: 5,
        address: "example.com:80".into(),
    })
    .await
    .unwrap();

    let stream = next_accepted(&mut accepted).await.unwrap();
    assert_eq!(stream.stream_id, 5);
    assert_eq!(stream.address, "example.com:80");
    assert_eq!(peer.recv().await.unwrap(), Frame::Ok { stream_id: 5 });
    assert!(session.has_stream(5));

    let mut events = stream.events;
    let payload = Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n");
    peer.send(&Frame::Data {
        stream_id: 5,
        payload: payload.clone(),
    })
    .await
    .unwrap();

    match events.recv().await {
        Some(StreamEvent::Frame(frame)) => {
            assert_eq!(frame, Frame::Data { stream_id: 5, payload })
        }
        other => panic!("expected DATA, got {other:?}"),
    }
}

/// A second SYN for an id whose connect is still running is rejected at once
/// and the first connect is left alone.
#[tokio::test]
async fn test_duplicate_syn_rejected() {
    init_tracing();
    let (session, mut peer) = raw_pair(Session::builder().connector(picky(8)));

    let syn = Frame::Syn {
        stream_id: 5,
        address: "slow:443".into(),
    };
    peer.send(&syn).await.unwrap();
    peer.send(&syn).await.unwrap();

    assert_eq!(
        peer.recv().await.unwrap(),
        Frame::Failed {
            stream_id: 5,
            reason: FailReason::IdExists,
        }
    );
    assert!(session.has_stream(5), "reservation should survive the duplicate");
    assert!(!session.is_closed());
}

/// A failed connect releases the id before FAILED goes out.
#[tokio::test]
async fn test_connect_failure_releases_id() {
    init_tracing();
    let (session, mut peer) = raw_pair(Session::builder().connector(picky(8)));

    peer.send(&Frame::Syn {
        stream_id: 7,
        address: "bad:0".into(),
    })
    .await
    .unwrap();

    assert_eq!(
        peer.recv().await.unwrap(),
        Frame::Failed {
            stream_id: 7,
            reason: FailReason::ConnectFailed,
        }
    );
    assert_eq!(session.stream_count(), 0);

    // the id is free again
    peer.send(&Frame::Syn {
        stream_id: 7,
        address: "good:80".into(),
    })
    .await
    .unwrap();
    assert_eq!(peer.recv().await.unwrap(), Frame::Ok { stream_id: 7 });
}

/// Without a connector every SYN is refused.
#[tokio::test]
async fn test_default_connector_refuses() {
    init_tracing();
    let (_session, mut peer) = raw_pair(Session::builder());

    peer.send(&Frame::Syn {
        stream_id: 1,
        address: "example.com:22".into(),
    })
    .await
    .unwrap();
    assert_eq!(
        peer.recv().await.unwrap(),
        Frame::Failed {
            stream_id: 1,
            reason: FailReason::ConnectFailed,
        }
    );
}

// ══════════════════════════════════════════════════════════════════════════════
//  DNS
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_dns_answered_with_addresses() {
    init_tracing();
    let (_session, mut peer) = raw_pair(Session::builder());

    peer.send(&Frame::Dns {
        stream_id: 9,
        hostname: KNOWN_HOST.into(),
    })
    .await
    .unwrap();

    match peer.recv().await.unwrap() {
        Frame::Addr {
            stream_id,
            addresses,
        } => {
            assert_eq!(stream_id, 9);
            assert!(addresses.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
            assert_eq!(addresses.len(), 2);
        }
        other => panic!("expected ADDR, got {other:?}"),
    }
}

/// Lookup failure is not an error on the wire, just an empty answer.
#[tokio::test]
async fn test_dns_failure_yields_empty_addr() {
    init_tracing();
    let (session, mut peer) = raw_pair(Session::builder());

    peer.send(&Frame::Dns {
        stream_id: 9,
        hostname: "nowhere.invalid".into(),
    })
    .await
    .unwrap();

    assert_eq!(
        peer.recv().await.unwrap(),
        Frame::Addr {
            stream_id: 9,
            addresses: Vec::new(),
        }
    );
    assert!(!session.is_closed());
}

// ══════════════════════════════════════════════════════════════════════════════
//  Session to session
// ══════════════════════════════════════════════════════════════════════════════

/// One session dials through another; data flows both ways on the stream.
#[tokio::test]
async fn test_dial_between_sessions() {
    init_tracing();
    let (connector, mut accepted) = accepting(8);
    let (client, server) = session_pair(
        Session::builder(),
        Session::builder().connector(connector),
    );

    let (stream_id, mut client_events) = client.dial("db.internal:5432").await.unwrap();
    let server_stream = next_accepted(&mut accepted).await.unwrap();
    assert_eq!(server_stream.stream_id, stream_id);
    assert_eq!(server_stream.address, "db.internal:5432");

    server
        .write_frame(&Frame::Data {
            stream_id,
            payload: Bytes::from_static(b"hello client"),
        })
        .await
        .unwrap();
    match client_events.recv().await {
        Some(StreamEvent::Frame(Frame::Data { payload, .. })) => {
            assert_eq!(&payload[..], b"hello client")
        }
        other => panic!("expected DATA, got {other:?}"),
    }

    client
        .write_frame(&Frame::Fin { stream_id })
        .await
        .unwrap();
    let mut server_events = server_stream.events;
    assert!(matches!(
        server_events.recv().await,
        Some(StreamEvent::Frame(Frame::Fin { .. }))
    ));
}

/// Dialing a session that accepts nothing fails and frees the id.
#[tokio::test]
async fn test_dial_rejected() {
    init_tracing();
    let (client, _server) = session_pair(Session::builder(), Session::builder());

    match client.dial("example.com:80").await {
        Err(SessionError::Rejected { reason, .. }) => {
            assert_eq!(reason, FailReason::ConnectFailed)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(client.stream_count(), 0);
}

#[tokio::test]
async fn test_resolve_through_peer() {
    init_tracing();
    let (client, _server) = session_pair(
        Session::builder(),
        Session::builder().resolver(canned_resolver()),
    );

    let addresses = client.resolve(KNOWN_HOST).await.unwrap();
    assert!(addresses.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));

    let addresses = client.resolve("nowhere.invalid").await.unwrap();
    assert!(addresses.is_empty());
    assert_eq!(client.stream_count(), 0);
}

/// Ids handed out locally are unique and never collide with what the peer
/// is using for its own streams.
#[tokio::test]
async fn test_local_streams_get_distinct_ids() {
    init_tracing();
    let (session, _peer) = raw_pair(Session::builder());

    let mut ids = Vec::new();
    for _ in 0..16 {
        let (tx, _rx) = tunmux::stream_queue(1);
        ids.push(session.open_stream(tx).unwrap());
    }
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(session.stream_count(), 16);

    session.remove_stream(ids[3]).unwrap();
    assert!(matches!(
        session.remove_stream(ids[3]),
        Err(SessionError::UnknownStream(_))
    ));
}

/// A caller-chosen id can be bound directly; frames for it are routed like
/// any other stream.
#[tokio::test]
async fn test_bind_stream_at_chosen_id() {
    init_tracing();
    let (session, mut peer) = raw_pair(Session::builder());

    let (tx, mut rx) = tunmux::stream_queue(4);
    session.bind_stream(300, tx).unwrap();
    assert!(session.has_stream(300));

    peer.send(&Frame::Ack {
        stream_id: 300,
        window: 65536,
    })
    .await
    .unwrap();
    match rx.recv().await {
        Some(StreamEvent::Frame(frame)) => assert_eq!(
            frame,
            Frame::Ack {
                stream_id: 300,
                window: 65536,
            }
        ),
        other => panic!("expected ACK, got {other:?}"),
    }
}
