//! Initiator against a live node
//!
//! Holmes starts the conversation; Watson is served on loopback and records
//! everything Holmes sends in its history.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::Instant;

use common::{eventually, StaticFetcher, TestNode};
use tellar::agent::{ScriptedAgent, ScriptedConfig};
use tellar::config::InitiatorSettings;
use tellar::discovery::{Peer, PeerDirectory};
use tellar::initiator::{filler, Initiator, OPENER_PROMPT};

fn settings() -> InitiatorSettings {
    InitiatorSettings {
        poll_interval_ms: 20,
        reconnect_delay_ms: 50,
        ..Default::default()
    }
}

fn spawn_holmes(watson: &TestNode) -> (Arc<ScriptedAgent>, tokio::task::JoinHandle<()>) {
    let directory = Arc::new(PeerDirectory::new());
    directory.replace([
        Peer::named("http://127.0.0.1:1", "Holmes"),
        Peer::named(watson.http_url(), "Watson"),
    ]);

    let holmes = Arc::new(ScriptedAgent::new("Holmes", "english"));
    let initiator = Initiator::new(holmes.clone(), directory, settings());
    let task = tokio::spawn(async move {
        let _ = initiator.run().await;
    });
    (holmes, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_opens_with_opener_and_keeps_talking() {
    let watson = TestNode::echo("Watson").await;
    let (_holmes, task) = spawn_holmes(&watson);

    let sessions = watson.state.clone();
    let talking = eventually(Duration::from_secs(5), || sessions.sessions().history("Holmes").len() >= 6).await;
    task.abort();
    assert!(talking, "conversation did not progress");

    let history = watson.state.sessions().history("Holmes");
    assert_eq!(history[0].sender, "Holmes");
    assert_eq!(history[0].text, format!("Holmes: {}", OPENER_PROMPT));
    assert_eq!(history[1].sender, "Watson");
    assert_eq!(history[1].text, format!("Watson: Holmes: {}", OPENER_PROMPT));
    // Holmes answers Watson's reply with its goal-driven fork
    assert_eq!(history[2].sender, "Holmes");
    assert_eq!(history[2].text, format!("Holmes: {}", history[1].text));

    watson.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_with_fillers() {
    let config = ScriptedConfig {
        fail: true,
        ..Default::default()
    };
    let watson = TestNode::with_config("Watson", config, Arc::new(StaticFetcher::default())).await;
    let (_holmes, task) = spawn_holmes(&watson);

    let sessions = watson.state.clone();
    let retried = eventually(Duration::from_secs(5), || sessions.sessions().history("Holmes").len() >= 3).await;
    task.abort();
    assert!(retried, "initiator never reconnected");

    let texts: Vec<_> = watson
        .state
        .sessions()
        .history("Holmes")
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts[0], format!("Holmes: {}", OPENER_PROMPT));
    assert_eq!(texts[1], filler(1));
    assert_eq!(texts[2], filler(2));

    watson.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_once_per_delay() {
    let delay = Duration::from_millis(300);

    // Accepts every connection, then hangs up right away
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let attempts = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let recorded = attempts.clone();
    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            recorded.lock().push(Instant::now());
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = ws.close(None).await;
            }
        }
    });

    let directory = Arc::new(PeerDirectory::new());
    directory.replace([Peer::named(format!("http://127.0.0.1:{}", port), "Watson")]);
    let holmes = Arc::new(ScriptedAgent::new("Holmes", "english"));
    let initiator = Initiator::new(
        holmes,
        directory,
        InitiatorSettings {
            poll_interval_ms: 20,
            reconnect_delay_ms: delay.as_millis() as u64,
            ..Default::default()
        },
    );
    let task = tokio::spawn(async move {
        let _ = initiator.run().await;
    });

    let reached = eventually(Duration::from_secs(5), || attempts.lock().len() >= 4).await;
    task.abort();
    server.abort();
    assert!(reached, "initiator stopped reconnecting");

    let attempts = attempts.lock().clone();
    for pair in attempts.windows(2) {
        assert!(
            pair[1] - pair[0] >= delay,
            "reconnected after {:?}, expected at least {:?}",
            pair[1] - pair[0],
            delay
        );
    }
}

#[tokio::test]
async fn test_goal_shapes_working_fork() {
    let watson = TestNode::echo("Watson").await;
    let (holmes, task) = spawn_holmes(&watson);

    let agent = holmes.clone();
    let answered = eventually(Duration::from_secs(5), || agent.answer_count() >= 3).await;
    task.abort();
    assert!(answered);

    let calls = holmes.calls();
    assert!(calls[0].goal.is_none());
    // Third call is the working fork answering Watson
    let goal = calls[2].goal.as_deref().unwrap();
    assert!(goal.starts_with("You are talking to Watson."));

    watson.stop().await;
}
