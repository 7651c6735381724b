mod common;

use common::{start_relay, wait_registered, wait_released, WAIT};
use linkium::agent::{
    AgentDeps, AgentObserver, AgentStatus, CodeGenerator, CodeStore, CodeStoreError,
    LaunchError, ProcessExecutor, ProgramCatalog, ReceiverAgent,
};
use linkium::audit::AuditRecorder;
use linkium::network::{ClientError, PairingCode, RelayConnection};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MemoryCodeStore {
    code: Mutex<Option<PairingCode>>,
}

impl CodeStore for MemoryCodeStore {
    fn load(&self) -> Result<Option<PairingCode>, CodeStoreError> {
        Ok(self.code.lock().clone())
    }
    fn save(&self, code: &PairingCode) -> Result<(), CodeStoreError> {
        *self.code.lock() = Some(code.clone());
        Ok(())
    }
}

struct SequenceGenerator {
    next: AtomicU64,
}

impl CodeGenerator for SequenceGenerator {
    fn generate(&self) -> PairingCode {
        PairingCode::new(self.next.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

struct StaticCatalog(BTreeMap<String, String>);

impl ProgramCatalog for StaticCatalog {
    fn programs(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingExecutor {
    launched: Mutex<Vec<(String, String)>>,
}

impl ProcessExecutor for RecordingExecutor {
    fn launch(&self, name: &str, target: &str) -> Result<(), LaunchError> {
        self.launched.lock().push((name.to_string(), target.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    codes: Mutex<Vec<PairingCode>>,
    dials: AtomicUsize,
}

impl AgentObserver for RecordingObserver {
    fn status_changed(&self, status: AgentStatus) {
        if status == AgentStatus::Connecting {
            self.dials.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn code_changed(&self, code: &PairingCode) {
        self.codes.lock().push(code.clone());
    }
}

struct Fixture {
    store: Arc<MemoryCodeStore>,
    executor: Arc<RecordingExecutor>,
    observer: Arc<RecordingObserver>,
    deps: AgentDeps,
}

fn fixture(initial: Option<&str>) -> Fixture {
    let store = Arc::new(MemoryCodeStore::default());
    if let Some(code) = initial {
        *store.code.lock() = Some(PairingCode::from(code));
    }
    let executor = Arc::new(RecordingExecutor::default());
    let observer = Arc::new(RecordingObserver::default());
    let mut programs = BTreeMap::new();
    programs.insert("notes".to_string(), "/usr/bin/notes".to_string());
    programs.insert("browser".to_string(), "/usr/bin/browser".to_string());
    let deps = AgentDeps {
        codes: store.clone(),
        generator: Arc::new(SequenceGenerator {
            next: AtomicU64::new(7_000_000_000),
        }),
        catalog: Arc::new(StaticCatalog(programs)),
        executor: executor.clone(),
        observer: observer.clone(),
    };
    Fixture {
        store,
        executor,
        observer,
        deps,
    }
}

async fn wait_status(rx: &mut tokio::sync::watch::Receiver<AgentStatus>, want: AgentStatus) {
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .expect("status change timed out")
        .expect("agent dropped its status channel");
}

#[tokio::test]
async fn missing_code_is_generated_and_saved() {
    let fx = fixture(None);
    let agent = ReceiverAgent::new("127.0.0.1:1", Duration::from_secs(1), fx.deps.clone()).unwrap();
    let code = agent.handle().code();
    assert_eq!(code.as_str(), "7000000000");
    assert_eq!(fx.store.code.lock().clone(), Some(code));
}

#[tokio::test]
async fn agent_answers_commands() {
    let (addr, ctx) = start_relay(AuditRecorder::disabled()).await;
    let fx = fixture(Some("1111111111"));
    let agent = ReceiverAgent::new(addr.clone(), Duration::from_millis(100), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());

    let code = PairingCode::from("1111111111");
    wait_registered(&ctx, &code).await;
    assert_eq!(handle.status(), AgentStatus::Connected);

    let mut sender = RelayConnection::connect(&addr).await.unwrap();
    sender.link(&code, WAIT).await.unwrap();

    sender.send(&json!({"command": "get_programs"})).await.unwrap();
    assert_eq!(
        sender.recv_json_timeout(WAIT).await.unwrap(),
        json!({"programs": [
            {"name": "browser", "path": "/usr/bin/browser"},
            {"name": "notes", "path": "/usr/bin/notes"}
        ]})
    );

    sender.send(&json!({"command": "open", "program": "ghost"})).await.unwrap();
    sender.send(&json!({"command": "open", "program": "notes"})).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while fx.executor.launched.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        fx.executor.launched.lock().clone(),
        vec![("notes".to_string(), "/usr/bin/notes".to_string())]
    );
    // `open` is fire-and-forget.
    assert!(matches!(
        sender.recv_json_timeout(Duration::from_millis(150)).await,
        Err(ClientError::Timeout)
    ));

    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.status(), AgentStatus::Disconnected);
}

#[tokio::test]
async fn regenerate_rotates_code_and_reregisters() {
    let (addr, ctx) = start_relay(AuditRecorder::disabled()).await;
    let fx = fixture(Some("1111111111"));
    let agent = ReceiverAgent::new(addr.clone(), Duration::from_secs(30), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());

    let old = PairingCode::from("1111111111");
    wait_registered(&ctx, &old).await;

    let mut sender = RelayConnection::connect(&addr).await.unwrap();
    sender.link(&old, WAIT).await.unwrap();
    sender.send(&json!({"command": "regenerate_code"})).await.unwrap();
    let reply = sender.recv_json_timeout(WAIT).await.unwrap();
    let new = PairingCode::from(reply["new_code"].as_str().unwrap());
    assert_ne!(new, old);
    assert_eq!(fx.store.code.lock().clone(), Some(new.clone()));
    assert_eq!(handle.code(), new);

    // Re-registration skips the 30s retry delay.
    wait_registered(&ctx, &new).await;
    wait_released(&ctx, &old).await;

    let mut late = RelayConnection::connect(&addr).await.unwrap();
    assert!(matches!(late.link(&old, WAIT).await, Err(ClientError::InvalidCode)));
    late.link(&new, WAIT).await.unwrap();
    late.send(&json!({"command": "get_programs"})).await.unwrap();
    assert!(late.recv_json_timeout(WAIT).await.unwrap()["programs"].is_array());

    assert!(fx.observer.codes.lock().contains(&new));
    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn external_code_change_triggers_reconnect() {
    let (addr, ctx) = start_relay(AuditRecorder::disabled()).await;
    let fx = fixture(Some("1111111111"));
    let agent = ReceiverAgent::new(addr.clone(), Duration::from_secs(30), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());
    wait_registered(&ctx, &PairingCode::from("1111111111")).await;

    let chosen = PairingCode::from("2222222222");
    handle.trigger_reconnect(Some(chosen.clone())).unwrap();
    wait_registered(&ctx, &chosen).await;
    wait_released(&ctx, &PairingCode::from("1111111111")).await;
    assert_eq!(fx.store.code.lock().clone(), Some(chosen));

    let local = handle.regenerate().unwrap();
    wait_registered(&ctx, &local).await;

    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_interrupts_retry_delay() {
    // Nothing listens here, so every dial fails and the agent sits in its retry delay.
    let unused = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    };
    let fx = fixture(Some("1111111111"));
    let agent = ReceiverAgent::new(unused, Duration::from_secs(60), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.status(), AgentStatus::Disconnected);
}

#[tokio::test]
async fn reconnect_request_interrupts_pending_connect() {
    // Non-routable address: the dial either hangs or fails at once. Either way
    // a reconnect request has to start a fresh dial without waiting out the
    // retry delay.
    let fx = fixture(Some("4444444444"));
    let agent = ReceiverAgent::new("10.255.255.1:9", Duration::from_secs(60), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());

    let dials = |fx: &Fixture| fx.observer.dials.load(Ordering::SeqCst);
    tokio::time::timeout(WAIT, async {
        while dials(&fx) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let before = dials(&fx);

    let chosen = PairingCode::from("4444444445");
    handle.trigger_reconnect(Some(chosen.clone())).unwrap();
    tokio::time::timeout(WAIT, async {
        while dials(&fx) <= before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconnect request did not start a new dial");
    assert_eq!(handle.code(), chosen);

    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn status_is_published() {
    let (addr, ctx) = start_relay(AuditRecorder::disabled()).await;
    let fx = fixture(Some("3333333333"));
    let agent = ReceiverAgent::new(addr, Duration::from_millis(50), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let mut status = handle.subscribe_status();
    let task = tokio::spawn(agent.run());

    wait_status(&mut status, AgentStatus::Connected).await;
    wait_registered(&ctx, &PairingCode::from("3333333333")).await;
    handle.stop();
    wait_status(&mut status, AgentStatus::Disconnected).await;
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn agent_recovers_after_relay_drops_it() {
    let (addr, ctx) = start_relay(AuditRecorder::disabled()).await;
    let fx = fixture(Some("1111111111"));
    let agent = ReceiverAgent::new(addr.clone(), Duration::from_millis(50), fx.deps.clone()).unwrap();
    let handle = agent.handle();
    let task = tokio::spawn(agent.run());
    let code = PairingCode::from("1111111111");
    wait_registered(&ctx, &code).await;
    let first = ctx.registry.receiver_for(&code).await;

    // Another connection takes the code; the relay evicts the agent, which
    // redials after its retry delay and takes the code back.
    let mut rival = RelayConnection::connect(&addr).await.unwrap();
    rival.register(&code).await.unwrap();
    let rival_id = tokio::time::timeout(WAIT, async {
        loop {
            let current = ctx.registry.receiver_for(&code).await;
            if current != first {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(WAIT, async {
        loop {
            let current = ctx.registry.receiver_for(&code).await;
            if current.is_some() && current != rival_id {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}
