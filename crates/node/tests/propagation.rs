use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use toolforge_core::{
    Candidate, Origin, Outcome, Param, PipelineError, ToolSignature, ToolStatus, ValueShape,
};
use toolforge_gossip::{Announcement, Broadcaster, PeerBook};
use toolforge_node::{Node, NodeConfig};

fn listener_config(data_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.data_dir = data_dir.to_path_buf();
    config.listen_addr = Some("127.0.0.1:0".to_string());
    config.max_cases = 6;
    config
}

async fn start_node(config: NodeConfig) -> Option<Node> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    match Node::init(config).await {
        Ok(node) => Some(node),
        Err(PipelineError::Isolation(e)) => {
            eprintln!("skipping: sandbox interpreter unavailable: {}", e);
            None
        }
        Err(e) => panic!("node init failed: {}", e),
    }
}

fn candidate(name: &str, source: &str) -> Candidate {
    Candidate {
        name: name.to_string(),
        description: format!("{} tool", name),
        source: source.to_string(),
        signature: ToolSignature {
            params: vec![Param {
                name: "x".to_string(),
                shape: ValueShape::Number,
            }],
            returns: ValueShape::Number,
            deterministic: true,
        },
    }
}

async fn wait_for_status(node: &Node, name: &str, wanted: ToolStatus) -> bool {
    for _ in 0..50 {
        if node.get_tool_status(name).await == Some(wanted) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_validated_tool_propagates_to_peer() {
    let dir_b = tempfile::tempdir().unwrap();
    let Some(node_b) = start_node(listener_config(dir_b.path())).await else { return };
    let addr_b = node_b.listen_addr().unwrap().to_string();

    let dir_a = tempfile::tempdir().unwrap();
    let mut config_a = NodeConfig::default();
    config_a.data_dir = dir_a.path().to_path_buf();
    config_a.peers = vec![addr_b];
    config_a.max_cases = 6;
    let Some(node_a) = start_node(config_a).await else { return };

    let source =
        "def square(x: float) -> float:\n    \"\"\"Square a number.\"\"\"\n    return x * x\n";
    node_a
        .submit_candidate(candidate("square", source))
        .await
        .unwrap();

    // B re-validates locally before the record appears at all.
    assert!(
        wait_for_status(&node_b, "square", ToolStatus::Active).await,
        "peer B never activated the announced tool"
    );

    let record = node_b.registry().get("square").await.unwrap();
    assert_eq!(record.origin, Origin::Peer(node_a.peer_id().to_string()));

    let outcome = node_b.invoke_tool("square", &[json!(6)]).await.unwrap();
    assert_eq!(outcome, Outcome::Returned(json!(36)));

    node_a.close().await.unwrap();
    node_b.close().await.unwrap();
}

#[tokio::test]
async fn test_forbidden_peer_tool_is_never_merged() {
    let dir_b = tempfile::tempdir().unwrap();
    let Some(node_b) = start_node(listener_config(dir_b.path())).await else { return };
    let addr_b = node_b.listen_addr().unwrap().to_string();

    // A buggy peer pushes a tool it wrongly considers active: the source
    // writes files, which B's own validator must catch.
    let source = "def div(x: float) -> float:\n    \"\"\"Divide and log.\"\"\"\n    with open(\"log.txt\", \"w\") as h:\n        h.write(str(x))\n    return x / 2\n";
    let bad = candidate("div", source);

    let peers = Arc::new(PeerBook::new());
    peers.add("rogue-peer", &addr_b).await;
    let broadcaster = Broadcaster::new(peers, Duration::from_secs(2));

    let record = toolforge_core::ToolRecord {
        name: bad.name.clone(),
        description: bad.description.clone(),
        source: bad.source.clone(),
        status: ToolStatus::Active,
        origin: Origin::Local,
        created_at: chrono::Utc::now().timestamp(),
        validation_report: None,
    };
    let announcement = Announcement::for_record(&record, &bad.signature, "rogue-peer");
    broadcaster.announce(&announcement).await;

    // Give the intake loop time to run the candidate through validation.
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Discarded entirely: no record, not even a rejected one.
    assert_eq!(node_b.get_tool_status("div").await, None);
    assert!(matches!(
        node_b.invoke_tool("div", &[json!(4)]).await,
        Err(PipelineError::NotFound(_))
    ));

    node_b.close().await.unwrap();
}

#[tokio::test]
async fn test_peer_tool_never_displaces_local_active_tool() {
    let dir_b = tempfile::tempdir().unwrap();
    let Some(node_b) = start_node(listener_config(dir_b.path())).await else { return };
    let addr_b = node_b.listen_addr().unwrap().to_string();

    let local_source =
        "def square(x: float) -> float:\n    \"\"\"Square a number.\"\"\"\n    return x * x\n";
    node_b
        .submit_candidate(candidate("square", local_source))
        .await
        .unwrap();

    // A peer announces a different implementation under the same name.
    let peer_source =
        "def square(x: float) -> float:\n    \"\"\"Square, peer flavored.\"\"\"\n    return x * x + 1\n";
    let peers = Arc::new(PeerBook::new());
    peers.add("other-node", &addr_b).await;
    let broadcaster = Broadcaster::new(peers, Duration::from_secs(2));
    let record = toolforge_core::ToolRecord {
        name: "square".to_string(),
        description: "square tool".to_string(),
        source: peer_source.to_string(),
        status: ToolStatus::Active,
        origin: Origin::Local,
        created_at: chrono::Utc::now().timestamp(),
        validation_report: None,
    };
    let announcement =
        Announcement::for_record(&record, &candidate("square", peer_source).signature, "other-node");
    broadcaster.announce(&announcement).await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    // First committer wins; the local implementation stays.
    let outcome = node_b.invoke_tool("square", &[json!(3)]).await.unwrap();
    assert_eq!(outcome, Outcome::Returned(json!(9)));
    let merged = node_b.registry().get("square").await.unwrap();
    assert_eq!(merged.origin, Origin::Local);

    node_b.close().await.unwrap();
}
