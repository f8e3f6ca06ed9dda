use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tcp_ping::{ProbeConfig, ProbeEvent, ProbeStats, Prober};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

/// Loopback listener that accepts and drops everything. `None` when binding is not allowed.
async fn listener() -> Option<SocketAddr> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("Failed to bind test listener: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });
    Some(addr)
}

/// A loopback port with nothing listening on it.
fn closed_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// Everything up to and including the first `end`.
async fn collect_run(events: &mut UnboundedReceiver<ProbeEvent>) -> Vec<ProbeEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            let end = event.is_end();
            seen.push(event);
            if end {
                break;
            }
        }
    })
    .await
    .expect("run did not end in time");
    seen
}

fn end_stats(events: &[ProbeEvent]) -> ProbeStats {
    match events.last() {
        Some(ProbeEvent::End(summary)) => summary.stats,
        other => panic!("expected end, got {other:?}"),
    }
}

fn fast(count: u64) -> ProbeConfig {
    ProbeConfig::default()
        .with_interval_ms(20)
        .with_timeout_ms(1000)
        .with_count(count)
}

#[tokio::test]
async fn test_reachable_target_connects_count_times() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), fast(2)).unwrap();
    let mut events = prober.events();
    prober.start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 3);
    assert!(run[..2].iter().all(|e| e.name() == "connect"));
    assert_eq!(end_stats(&run), ProbeStats { sent: 2, success: 2, failed: 0 });

    for (i, event) in run[..2].iter().enumerate() {
        let result = event.result().unwrap();
        assert_eq!(result.seq, i as u64 + 1);
        let rtt = result.rtt_ms.unwrap();
        assert!(rtt.is_finite() && rtt >= 0.0);
        assert_eq!(result.socket.remote, Some(addr));
        assert!(result.socket.local_port().is_some());
    }
    assert!(!prober.is_running());
}

#[tokio::test]
async fn test_closed_port_reports_error() {
    let prober = Prober::new("127.0.0.1", closed_port(), fast(1)).unwrap();
    let mut events = prober.events();
    prober.start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 2);
    match &run[0] {
        ProbeEvent::Error { result, error } => {
            assert_eq!(result.seq, 1);
            assert!(result.rtt_ms.is_none());
            assert!(error.errno.is_some());
            assert!(!error.is_aborted());
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(end_stats(&run), ProbeStats { sent: 1, success: 0, failed: 1 });
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_unanswered_handshake_times_out() {
    use socket2::{Domain, Socket, Type};

    // A listener that never accepts, with its queue filled, drops further SYNs
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    if socket.bind(&bind.into()).is_err() {
        return;
    }
    socket.listen(0).unwrap();
    let addr = socket.local_addr().unwrap().as_socket().unwrap();

    let mut fillers = Vec::new();
    for _ in 0..4 {
        if let Ok(Ok(stream)) =
            tokio::time::timeout(Duration::from_millis(200), tokio::net::TcpStream::connect(addr)).await
        {
            fillers.push(stream);
        }
    }

    let prober = Prober::new(
        "127.0.0.1",
        addr.port(),
        ProbeConfig::default().with_timeout_ms(50).with_count(1),
    )
    .unwrap();
    let mut events = prober.events();
    prober.start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 2);
    match &run[0] {
        ProbeEvent::Timeout(result) => {
            assert!(result.rtt_ms.is_none());
            assert_eq!(result.socket.remote, None);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(end_stats(&run), ProbeStats { sent: 1, success: 0, failed: 1 });
    drop(fillers);
}

#[tokio::test]
async fn test_stop_from_connect_handler_ends_early() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), ProbeConfig::default().with_count(2)).unwrap();
    prober.subscribe(|p, event| {
        if let ProbeEvent::Connect(result) = event {
            assert_eq!(result.stats, ProbeStats { sent: 1, success: 1, failed: 0 });
            p.stop();
        }
    });
    let mut events = prober.events();
    prober.start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 2);
    assert_eq!(run[0].name(), "connect");
    assert_eq!(end_stats(&run), ProbeStats { sent: 1, success: 1, failed: 0 });

    // the second attempt would have started after one interval
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(prober.stats().sent, 1);
}

#[tokio::test]
async fn test_end_fires_once_despite_repeated_stop() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), fast(1)).unwrap();
    let ends = Arc::new(AtomicUsize::new(0));
    {
        let ends = ends.clone();
        prober.subscribe(move |_, event| {
            if event.is_end() {
                ends.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    let mut events = prober.events();
    prober.start();

    collect_run(&mut events).await;
    prober.stop();
    prober.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_without_attempt_in_flight_still_ends() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), ProbeConfig::default().with_interval_ms(60_000)).unwrap();
    let mut events = prober.events();
    prober.start();

    // let the first attempt settle, the next one is a minute away
    let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(first.name(), "connect");

    prober.stop();
    let rest = collect_run(&mut events).await;
    assert_eq!(rest.len(), 1);
    assert_eq!(end_stats(&rest), ProbeStats { sent: 1, success: 1, failed: 0 });
}

#[tokio::test]
async fn test_restart_resets_counts_and_sequence() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), fast(2)).unwrap();
    let runs = Arc::new(Mutex::new(Vec::new()));
    {
        let runs = runs.clone();
        prober.subscribe(move |p, event| match event {
            ProbeEvent::Connect(result) => runs.lock().unwrap().push(result.seq),
            ProbeEvent::End(summary) => {
                assert_eq!(summary.stats, ProbeStats { sent: 2, success: 2, failed: 0 });
                if runs.lock().unwrap().len() < 10 {
                    p.start();
                }
            }
            _ => {}
        });
    }
    let mut events = prober.events();
    prober.start();

    for _ in 0..5 {
        let run = collect_run(&mut events).await;
        assert_eq!(end_stats(&run), ProbeStats { sent: 2, success: 2, failed: 0 });
    }
    assert_eq!(*runs.lock().unwrap(), vec![1, 2, 1, 2, 1, 2, 1, 2, 1, 2]);
}

#[tokio::test]
async fn test_resume_keeps_counting() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), fast(1)).unwrap();
    let mut events = prober.events();

    prober.start();
    assert_eq!(end_stats(&collect_run(&mut events).await).sent, 1);

    // count already spent, so the resumed run ends without a new attempt
    prober.resume();
    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 1);
    assert_eq!(end_stats(&run), ProbeStats { sent: 1, success: 1, failed: 0 });
}

#[tokio::test]
async fn test_start_while_running_is_ignored() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new("127.0.0.1", addr.port(), fast(3)).unwrap();
    let mut events = prober.events();
    prober.start().start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 4);
    assert_eq!(end_stats(&run), ProbeStats { sent: 3, success: 3, failed: 0 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flood_mode_honours_count() {
    let Some(addr) = listener().await else { return };
    let prober = Prober::new(
        "127.0.0.1",
        addr.port(),
        ProbeConfig::default().with_interval_ms(0).with_count(50),
    )
    .unwrap();
    let mut events = prober.events();
    prober.start();

    let run = collect_run(&mut events).await;
    assert_eq!(run.len(), 51);
    let stats = end_stats(&run);
    assert_eq!(stats.sent, 50);
    assert_eq!(stats.sent, stats.success + stats.failed);

    // settlement order may differ from sequence order, but every seq shows up once
    let mut seqs: Vec<u64> = run[..50].iter().map(|e| e.result().unwrap().seq).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=50).collect::<Vec<_>>());

    // counters in emitted events only ever grow
    let settled: Vec<u64> = run[..50].iter().map(|e| e.stats().settled()).collect();
    assert!(settled.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_with_attempts_in_flight_keeps_invariant() {
    // TEST-NET-1 never answers; attempts either hang or fail fast depending on routing
    let prober = Prober::new(
        "192.0.2.1",
        9,
        ProbeConfig::default().with_interval_ms(5).with_timeout_ms(30_000),
    )
    .unwrap();
    let mut events = prober.events();
    prober.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    prober.stop();

    let run = collect_run(&mut events).await;
    let stats = end_stats(&run);
    assert!(stats.sent > 0);
    assert_eq!(stats.sent, stats.success + stats.failed);
    assert_eq!(run.len() as u64, stats.sent + 1);
    assert!(!prober.is_running());
}
