//! Integration tests for W2P nodes
//!
//! Every test runs real nodes on loopback UDP sockets with short timeouts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use w2p_core::{transport, Directory, Endpoint, Message, PeerSet, Payload, Website};
use w2p_node::{publish, signing, Node, NodeConfig, RetrievalOutcome};

const CHUNK: usize = 4096;

fn config(dir: &TempDir) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.name = "test".to_string();
    config.addr = "127.0.0.1:0".to_string();
    config.data_dir = dir.path().to_string_lossy().into_owned();
    config.transfer.chunk_size = CHUNK;
    config.transfer.data_request_timeout_ms = 300;
    config.transfer.retry_interval_ms = 60_000;
    config.liveness.heartbeat_timeout_ms = 300;
    config.gossip.anti_entropy_interval_ms = 60_000;
    config
}

/// Deterministic incompressible bytes
fn noise(len: usize, mut seed: u64) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed as u8
        })
        .collect()
}

/// Author a website of several chunks on `node`
fn author(node: &Node, name: &str) -> Website {
    let dir = node.layout().website_path(name).unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), format!("<h1>{}</h1>", name)).unwrap();
    std::fs::write(dir.join("data.bin"), noise(20_000, 0x9e37_79b9)).unwrap();

    let website = publish::author_website(
        node.layout(),
        node.addr(),
        name,
        vec!["test".to_string()],
        CHUNK,
    )
    .unwrap();
    assert!(website.chunk_count() >= 3);
    website
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Timed out waiting for {}", what);
}

fn archive(node: &Node, name: &str) -> Option<Vec<u8>> {
    std::fs::read(node.layout().archive_path(name).unwrap()).ok()
}

/// A seeder that answers every chunk request with the wrong bytes
async fn spawn_liar() -> Endpoint {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = Endpoint::new(socket.local_addr().unwrap());
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        loop {
            let Ok((len, _)) = transport::receive(&socket, &mut buf).await else {
                continue;
            };
            let Ok(request) = Message::decode(&buf[..len]) else {
                continue;
            };
            match request.payload {
                Payload::DataRequest(_) => {
                    let reply = Message::data_reply(&request, b"not the chunk".to_vec()).unwrap();
                    let _ = transport::send_message(&socket, &reply, &request.origin).await;
                }
                Payload::Heartbeat => {
                    let echo = Message::heartbeat(addr, request.origin);
                    let _ = transport::send_message(&socket, &echo, &request.origin).await;
                }
                _ => {}
            }
        }
    });
    addr
}

async fn started(dir: &TempDir) -> Arc<Node> {
    let node = Node::bind(config(dir)).await.unwrap();
    node.start().await;
    node
}

#[tokio::test]
async fn test_retrieval_skips_silent_seeder() {
    let b_dir = TempDir::new().unwrap();
    let b = Node::bind(config(&b_dir)).await.unwrap();
    let website = author(&b, "site");
    b.start().await;
    assert!(b.websites().get("site").await.is_some());

    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_ep = Endpoint::new(silent.local_addr().unwrap());

    let a_dir = TempDir::new().unwrap();
    let a = started(&a_dir).await;
    let mut copy = website.clone();
    copy.seeders = PeerSet::from(vec![silent_ep, b.addr()]);
    a.websites().set(copy).await;

    let outcome = a.retrieve("site").await;
    assert_eq!(outcome, Some(RetrievalOutcome::Complete));
    assert_eq!(archive(&a, "site"), archive(&b, "site"));
    assert!(!a.layout().part_path("site").unwrap().exists());

    let index = a.layout().website_path("site").unwrap().join("index.html");
    assert_eq!(std::fs::read_to_string(index).unwrap(), "<h1>site</h1>");
    assert!(signing::verify(a.layout(), &website).unwrap());

    let seeders = a.websites().get("site").await.unwrap().seeders;
    assert!(seeders.contains(&a.addr()));
    assert_eq!(a.store().load("site").unwrap().unwrap().version, website.version);

    // the silent seeder was probed and dropped
    let a = &a;
    eventually("silent seeder eviction", || async move {
        !a.websites().get("site").await.unwrap().seeders.contains(&silent_ep)
    })
    .await;
    drop(silent);
}

#[tokio::test]
async fn test_mismatching_reply_never_written() {
    let b_dir = TempDir::new().unwrap();
    let b = Node::bind(config(&b_dir)).await.unwrap();
    let website = author(&b, "site");
    b.start().await;

    let liar = spawn_liar().await;

    let a_dir = TempDir::new().unwrap();
    let a = started(&a_dir).await;

    let mut copy = website.clone();
    copy.seeders = PeerSet::from(vec![liar]);
    a.websites().set(copy.clone()).await;

    let outcome = a.retrieve("site").await.unwrap();
    let all: Vec<usize> = (0..website.chunk_count()).collect();
    assert_eq!(outcome, RetrievalOutcome::Incomplete { missing: all });
    assert!(archive(&a, "site").is_none());
    assert!(!a.layout().part_path("site").unwrap().exists());
    assert_eq!(a.pending().await, vec!["site".to_string()]);
    // answering with bad data is not a liveness failure
    assert!(a.websites().get("site").await.unwrap().seeders.contains(&liar));

    copy.seeders = PeerSet::from(vec![liar, b.addr()]);
    a.websites().set(copy).await;
    let outcome = a.retrieve("site").await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(archive(&a, "site"), archive(&b, "site"));
    assert!(a.pending().await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_echo_adds_peer() {
    let a_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();
    let a = started(&a_dir).await;
    let b = started(&b_dir).await;

    assert_eq!(a.check_peer(b.addr()).await, Some(true));
    assert!(a.peers().contains(&b.addr()).await);
    assert_eq!(a.routes().next_hop(&b.addr()).await, b.addr());
}

#[tokio::test]
async fn test_dead_peer_evicted() {
    let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead_ep = Endpoint::new(dead.local_addr().unwrap());

    let a_dir = TempDir::new().unwrap();
    let mut cfg = config(&a_dir);
    cfg.peers = dead_ep.to_string();
    let a = Node::bind(cfg).await.unwrap();
    assert!(a.peers().contains(&dead_ep).await);

    let mut website = Website::new("site", "key", vec![]);
    website.seeders.add(dead_ep);
    a.websites().set(website).await;

    assert_eq!(a.check_peer(dead_ep).await, Some(false));
    assert!(!a.peers().contains(&dead_ep).await);
    assert!(a.websites().get("site").await.unwrap().seeders.is_empty());
}

#[tokio::test]
async fn test_gossip_replicates_website() {
    let b_dir = TempDir::new().unwrap();
    let mut b_cfg = config(&b_dir);
    b_cfg.gossip.anti_entropy_interval_ms = 100;
    let b = Node::bind(b_cfg).await.unwrap();
    author(&b, "site");
    b.start().await;

    let a_dir = TempDir::new().unwrap();
    let mut a_cfg = config(&a_dir);
    a_cfg.gossip.anti_entropy_interval_ms = 100;
    a_cfg.peers = b.addr().to_string();
    let a = Node::bind(a_cfg).await.unwrap();
    a.start().await;
    let (a, b) = (&a, &b);

    // b learns about a from a's metadata push
    eventually("b to discover a", || async move { b.peers().contains(&a.addr()).await }).await;

    eventually("a to seed the website", || async move {
        match a.websites().get("site").await {
            Some(website) => website.seeders.contains(&a.addr()),
            None => false,
        }
    })
    .await;
    assert_eq!(archive(&a, "site"), archive(&b, "site"));
    assert_eq!(a.websites().search("test").await, vec!["site".to_string()]);

    // a new version published on b reaches a
    let dir = b.layout().website_path("site").unwrap();
    std::fs::write(dir.join("index.html"), "<h1>v2</h1>").unwrap();
    publish::update_website(b.layout(), b.addr(), "site", None, CHUNK).unwrap();

    eventually("a to fetch version 2", || async move {
        match a.websites().get("site").await {
            Some(website) => website.version == 2 && website.seeders.contains(&a.addr()),
            None => false,
        }
    })
    .await;
    let index = a.layout().website_path("site").unwrap().join("index.html");
    assert_eq!(std::fs::read_to_string(index).unwrap(), "<h1>v2</h1>");
}

#[tokio::test]
async fn test_new_version_replaces_unpacked_files() {
    let b_dir = TempDir::new().unwrap();
    let b = Node::bind(config(&b_dir)).await.unwrap();
    author(&b, "site");
    b.start().await;

    let a_dir = TempDir::new().unwrap();
    let a = started(&a_dir).await;
    a.websites().set(b.websites().get("site").await.unwrap()).await;
    assert_eq!(a.retrieve("site").await, Some(RetrievalOutcome::Complete));

    let dir = b.layout().website_path("site").unwrap();
    std::fs::write(dir.join("index.html"), "<h1>v2</h1>").unwrap();
    std::fs::remove_file(dir.join("data.bin")).unwrap();
    let v2 = publish::update_website(b.layout(), b.addr(), "site", None, CHUNK).unwrap();
    b.websites().set(v2.clone()).await;
    a.websites().set(v2.clone()).await;

    assert_eq!(a.retrieve("site").await, Some(RetrievalOutcome::Complete));
    assert_eq!(archive(&a, "site"), archive(&b, "site"));
    let unpacked = a.layout().website_path("site").unwrap();
    assert_eq!(
        std::fs::read_to_string(unpacked.join("index.html")).unwrap(),
        "<h1>v2</h1>"
    );
    assert!(!unpacked.join("data.bin").exists());
    assert!(signing::verify(a.layout(), &v2).unwrap());
    assert_eq!(a.store().load("site").unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn test_key_mismatch_snapshot_rejected() {
    let b_dir = TempDir::new().unwrap();
    let b = Node::bind(config(&b_dir)).await.unwrap();
    let website = author(&b, "site");
    b.start().await;

    let mut forged = website.clone();
    forged.owner_key = "00".repeat(32);
    forged.version = 9;
    let mut extra = Website::new("other", "11", vec![]);
    extra.version = 1;
    let snapshot: Directory = [forged, extra]
        .into_iter()
        .map(|w| (w.name.clone(), w))
        .collect();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sender_ep = Endpoint::new(sender.local_addr().unwrap());
    let message = Message::metadata(sender_ep, b.addr(), snapshot);
    transport::send_message(&sender, &message, &b.addr()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let kept = b.websites().get("site").await.unwrap();
    assert_eq!(kept.version, website.version);
    assert_eq!(kept.owner_key, website.owner_key);
    assert!(b.websites().get("other").await.is_none());

    // node keeps serving
    let a_dir = TempDir::new().unwrap();
    let a = started(&a_dir).await;
    assert_eq!(a.check_peer(b.addr()).await, Some(true));
}

#[tokio::test]
async fn test_messages_relayed_both_ways() {
    let r_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();
    let relay = started(&r_dir).await;
    let b = started(&b_dir).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_ep = Endpoint::new(client.local_addr().unwrap());

    let probe = Message::heartbeat(client_ep, b.addr());
    transport::send_message(&client, &probe, &relay.addr()).await.unwrap();

    let mut buf = vec![0u8; 512];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), transport::receive(&client, &mut buf))
        .await
        .expect("echo through relay")
        .unwrap();
    let echo = Message::decode(&buf[..len]).unwrap();
    assert_eq!(echo.origin, b.addr());
    assert_eq!(Endpoint::new(from), relay.addr());
    assert_eq!(b.routes().next_hop(&client_ep).await, relay.addr());

    // spent hop budget is dropped at the relay
    let mut dead_end = Message::heartbeat(client_ep, b.addr());
    dead_end.ttl = 0;
    transport::send_message(&client, &dead_end, &relay.addr()).await.unwrap();
    let nothing = tokio::time::timeout(Duration::from_millis(300), transport::receive(&client, &mut buf)).await;
    assert!(nothing.is_err());
}
