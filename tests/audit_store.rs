mod common;

use common::{start_relay, wait_registered, wait_relay_stats, wait_released, WAIT};
use linkium::audit::{AuditEvent, AuditRecorder, AuditSink, Direction, FileAuditSink};
use linkium::network::{PairingCode, RelayConnection};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn file_sink_upserts_pairings_and_appends_messages() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = FileAuditSink::open(tmp.path()).await.unwrap();

    sink.record(&AuditEvent::Registration {
        code: "123".into(),
        receiver_addr: "10.0.0.1:5000".into(),
        active: true,
        last_updated: 1.0,
    })
    .await
    .unwrap();
    sink.record(&AuditEvent::Link {
        code: "123".into(),
        sender_addr: "10.0.0.2:6000".into(),
        time: 2.0,
    })
    .await
    .unwrap();
    sink.record(&AuditEvent::Registration {
        code: "123".into(),
        receiver_addr: "10.0.0.1:5000".into(),
        active: false,
        last_updated: 3.0,
    })
    .await
    .unwrap();
    sink.record(&AuditEvent::Relay {
        direction: Direction::SenderToReceiver,
        message: json!({"command": "get_programs"}),
        timestamp: 4.0,
        from_addr: "10.0.0.2:6000".into(),
    })
    .await
    .unwrap();

    let rec = sink.pairing("123").await.unwrap();
    assert!(!rec.active);
    assert_eq!(rec.last_updated, 3.0);
    assert_eq!(rec.senders.len(), 1);
    assert_eq!(rec.senders[0].addr, "10.0.0.2:6000");

    // Reopening reads the persisted document back.
    let reopened = FileAuditSink::open(tmp.path()).await.unwrap();
    assert_eq!(reopened.pairing("123").await, Some(rec));

    let lines = std::fs::read_to_string(sink.messages_path()).unwrap();
    let entry: Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(entry["kind"], "relay");
    assert_eq!(entry["direction"], "sender->receiver");
    assert_eq!(entry["message"], json!({"command": "get_programs"}));
}

#[tokio::test]
async fn relay_traffic_is_audited() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileAuditSink::open(tmp.path()).await.unwrap());
    let (addr, ctx) = start_relay(AuditRecorder::spawn(sink.clone(), 64)).await;

    let code = PairingCode::from("8000000001");
    let mut rx = RelayConnection::connect(&addr).await.unwrap();
    rx.register(&code).await.unwrap();
    wait_registered(&ctx, &code).await;

    let mut sender = RelayConnection::connect(&addr).await.unwrap();
    sender.link(&code, WAIT).await.unwrap();
    sender.send(&json!({"hello": "receiver"})).await.unwrap();
    rx.recv_json_timeout(WAIT).await.unwrap();
    rx.send(&json!({"hello": "sender"})).await.unwrap();
    sender.recv_json_timeout(WAIT).await.unwrap();
    rx.shutdown().await;
    wait_released(&ctx, &code).await;

    let messages_path = sink.messages_path().to_path_buf();
    let (record, lines) = tokio::time::timeout(WAIT, async {
        loop {
            let record = sink.pairing(code.as_str()).await;
            let lines = std::fs::read_to_string(&messages_path).unwrap_or_default();
            let done = lines.lines().count() >= 2
                && record.as_ref().map(|r| !r.active).unwrap_or(false);
            if done {
                break (record, lines);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let record = record.unwrap();
    assert_eq!(record.senders.len(), 1);
    let directions: Vec<String> = lines
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap()["direction"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(directions, vec!["sender->receiver", "receiver->sender"]);
}

struct MemoryAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), linkium::audit::AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn rejected_links_are_not_audited() {
    use linkium::network::{ConnHandle, PairingRegistry};
    use tokio::sync::mpsc;

    let mem = Arc::new(MemoryAuditSink {
        events: parking_lot::Mutex::new(Vec::new()),
    });
    let registry = PairingRegistry::new(AuditRecorder::spawn(mem.clone(), 16), true);
    let (tx_r, _rx_r) = mpsc::channel::<String>(4);
    let (tx_s, _rx_s) = mpsc::channel::<String>(4);
    let receiver = ConnHandle::new("127.0.0.1:40001".parse().unwrap(), tx_r);
    let sender = ConnHandle::new("127.0.0.1:40002".parse().unwrap(), tx_s);
    let code = PairingCode::from("1212121212");

    registry.register_receiver(&code, &receiver).await;
    assert!(registry.link_sender(&"0000".into(), &sender).await.is_err());
    registry.link_sender(&code, &sender).await.unwrap();
    registry.unregister(&receiver).await;

    tokio::time::timeout(WAIT, async {
        while mem.events.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let events = mem.events.lock().clone();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], AuditEvent::Registration { active: true, .. }));
    assert!(matches!(&events[1], AuditEvent::Link { code: c, .. } if *c == code));
    assert!(matches!(&events[2], AuditEvent::Registration { active: false, .. }));
}

struct FailingAuditSink {
    attempts: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _event: &AuditEvent) -> Result<(), linkium::audit::AuditError> {
        self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(std::io::Error::other("disk full").into())
    }
}

#[tokio::test]
async fn failing_audit_sink_does_not_stop_relaying() {
    let failing = Arc::new(FailingAuditSink {
        attempts: std::sync::atomic::AtomicUsize::new(0),
    });
    let (addr, ctx) = start_relay(AuditRecorder::spawn(failing.clone(), 16)).await;

    let code = PairingCode::from("8100000001");
    let mut rx = RelayConnection::connect(&addr).await.unwrap();
    rx.register(&code).await.unwrap();
    wait_registered(&ctx, &code).await;

    let mut sender = RelayConnection::connect(&addr).await.unwrap();
    sender.link(&code, WAIT).await.unwrap();
    for i in 0..3 {
        sender.send(&json!({"n": i})).await.unwrap();
        assert_eq!(rx.recv_json_timeout(WAIT).await.unwrap(), json!({"n": i}));
        rx.send(&json!({"ack": i})).await.unwrap();
        assert_eq!(sender.recv_json_timeout(WAIT).await.unwrap(), json!({"ack": i}));
    }

    // A second sender can still link after the sink has failed repeatedly.
    let mut late = RelayConnection::connect(&addr).await.unwrap();
    late.link(&code, WAIT).await.unwrap();
    late.send(&json!({"late": true})).await.unwrap();
    assert_eq!(rx.recv_json_timeout(WAIT).await.unwrap(), json!({"late": true}));

    tokio::time::timeout(WAIT, async {
        while failing.attempts.load(std::sync::atomic::Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    wait_relay_stats(&ctx, 7, 0).await;
}
