use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Keepalive and idle close
//
//  All on a paused clock: sleeps return as soon as every task is idle, so
//  six-minute scenarios finish instantly.
// ══════════════════════════════════════════════════════════════════════════════

const MINUTE: Duration = Duration::from_secs(60);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// `elapsed` is `expected`, give or take timer rounding.
fn assert_within(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + secs(1),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

/// A peer that never pings is given up on after six ping intervals.
#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    init_tracing();
    let (session, _peer) = raw_pair(Session::builder());
    let start = Instant::now();

    let reason = timeout(10 * MINUTE, session.closed())
        .await
        .expect("session should give up on a silent peer");

    assert_eq!(reason, CloseReason::KeepaliveTimeout);
    assert_within(start.elapsed(), secs(180));
}

/// Each PING from the peer restarts the liveness deadline.
#[tokio::test(start_paused = true)]
async fn test_ping_resets_deadline() {
    init_tracing();
    let (session, mut peer) = raw_pair(Session::builder());
    let start = Instant::now();

    sleep(secs(170)).await;
    peer.send(&Frame::Ping).await.unwrap();
    sleep(secs(15)).await;
    assert!(!session.is_closed(), "ping at 170s should keep the session past 180s");

    let reason = timeout(10 * MINUTE, session.closed()).await.unwrap();
    assert_eq!(reason, CloseReason::KeepaliveTimeout);
    assert_within(start.elapsed(), secs(350));
}

/// The session pings once on its own, then answers each PING one interval
/// after receiving it.
#[tokio::test(start_paused = true)]
async fn test_pings_answered_after_interval() {
    init_tracing();
    let (_session, mut peer) = raw_pair(Session::builder());
    let start = Instant::now();

    assert_eq!(peer.recv_within(MINUTE).await.unwrap(), Frame::Ping);
    assert_within(start.elapsed(), secs(30));

    sleep(secs(10)).await;
    peer.send(&Frame::Ping).await.unwrap();
    assert_eq!(peer.recv_within(MINUTE).await.unwrap(), Frame::Ping);
    assert_within(start.elapsed(), secs(70));
}

/// Two sessions keep each other alive indefinitely, and neither starts the
/// idle countdown before it has had a stream.
#[tokio::test(start_paused = true)]
async fn test_paired_sessions_stay_up() {
    init_tracing();
    let (a, b) = session_pair(Session::builder(), Session::builder());

    sleep(30 * MINUTE).await;
    assert!(!a.is_closed());
    assert!(!b.is_closed());
    assert!(!a.idle_close_armed());
}

/// Once the last stream goes, the session closes after the idle interval and
/// the peer sees the transport end.
#[tokio::test(start_paused = true)]
async fn test_idle_session_closes() {
    init_tracing();
    let (a, b) = session_pair(Session::builder(), Session::builder());

    let (tx, _rx) = tunmux::stream_queue(4);
    let id = a.open_stream(tx).unwrap();
    a.remove_stream(id).unwrap();
    assert!(a.idle_close_armed());
    let start = Instant::now();

    sleep(secs(599)).await;
    assert!(!a.is_closed());

    let reason = timeout(MINUTE, a.closed()).await.unwrap();
    assert_eq!(reason, CloseReason::IdleTimeout);
    assert_within(start.elapsed(), secs(600));

    let reason = timeout(MINUTE, b.closed()).await.unwrap();
    assert!(matches!(reason, CloseReason::Transport(_)), "got {reason:?}");
}

/// A new stream during the countdown cancels it; removing that stream starts
/// a fresh one.
#[tokio::test(start_paused = true)]
async fn test_new_stream_cancels_idle_close() {
    init_tracing();
    let (a, _b) = session_pair(Session::builder(), Session::builder());

    let (tx, _rx) = tunmux::stream_queue(4);
    let first = a.open_stream(tx).unwrap();
    a.remove_stream(first).unwrap();
    assert!(a.idle_close_armed());

    sleep(secs(300)).await;
    let (tx, _rx) = tunmux::stream_queue(4);
    let second = a.open_stream(tx).unwrap();
    assert!(!a.idle_close_armed());

    sleep(secs(700)).await;
    assert!(!a.is_closed(), "an open stream keeps the session up");

    a.remove_stream(second).unwrap();
    let start = Instant::now();
    let reason = timeout(20 * MINUTE, a.closed()).await.unwrap();
    assert_eq!(reason, CloseReason::IdleTimeout);
    assert!(start.elapsed() >= secs(600));
}

/// A peer that stops reading is still detected: the PING that cannot be
/// written does not stall the liveness deadline.
#[tokio::test(start_paused = true)]
async fn test_deadline_fires_while_writes_blocked() {
    init_tracing();
    let (session, _peer) = raw_pair_with_capacity(Session::builder(), 64);
    let start = Instant::now();

    let stuck = {
        let session = session.clone();
        tokio::spawn(async move { session.write(&[0u8; 4096]).await })
    };

    let reason = timeout(60 * MINUTE, session.closed())
        .await
        .expect("deadline should fire with the writer blocked");
    assert_eq!(reason, CloseReason::KeepaliveTimeout);
    assert_within(start.elapsed(), secs(180));
    assert!(stuck.await.unwrap().is_err());
}

/// Streams can be dropped from threads outside the runtime; the idle timer
/// still runs on the session's runtime.
#[tokio::test(start_paused = true)]
async fn test_remove_stream_from_plain_thread() {
    init_tracing();
    let (a, _b) = session_pair(Session::builder(), Session::builder());

    let (tx, _rx) = tunmux::stream_queue(4);
    let id = a.open_stream(tx).unwrap();

    let remote = a.clone();
    std::thread::spawn(move || remote.remove_stream(id))
        .join()
        .expect("remove_stream panicked off the runtime")
        .unwrap();
    assert!(a.idle_close_armed());

    let reason = timeout(20 * MINUTE, a.closed()).await.unwrap();
    assert_eq!(reason, CloseReason::IdleTimeout);
}
