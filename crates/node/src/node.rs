use crate::audit::{AuditSink, FileAudit};
use crate::config::NodeConfig;
use crate::pipeline::Pipeline;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use toolforge_core::{Candidate, Origin, Outcome, PipelineError, ToolRecord, ToolStatus};
use toolforge_gossip::{Broadcaster, PeerBook, Subscriber};
use toolforge_registry::ToolRegistry;
use toolforge_sandbox::{HostSnapshot, SandboxExecutor};
use toolforge_validator::RuleSet;
use tracing::{info, warn};

/// One instance of the system: registry, sandbox, pipeline and gossip
/// wired together. Several nodes with distinct data dirs and ports can
/// coexist in one process, which is exactly how the integration tests
/// build their topologies.
pub struct Node {
    registry: Arc<ToolRegistry>,
    pipeline: Arc<Pipeline>,
    peers: Arc<PeerBook>,
    peer_id: String,
    subscriber: Option<Subscriber>,
    intake: Option<JoinHandle<()>>,
    evictor: JoinHandle<()>,
}

impl Node {
    pub async fn init(config: NodeConfig) -> Result<Self, PipelineError> {
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(PipelineError::Registry(format!(
                "invalid configuration: {}",
                issues.join("; ")
            )));
        }

        let snapshot = HostSnapshot::capture();
        info!("Starting node ({})", snapshot.to_concise_string());

        // No interpreter means no isolation boundary; refuse to start
        // rather than run candidates on the host.
        let executor = match &config.python_bin {
            Some(bin) => SandboxExecutor::with_python(bin.clone()).await,
            None => SandboxExecutor::new().await,
        }
        .map_err(|e| PipelineError::Isolation(e.to_string()))?;

        let registry = Arc::new(
            ToolRegistry::open(&config.data_dir)
                .await
                .map_err(|e| PipelineError::Registry(e.to_string()))?
                .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms)),
        );

        let peer_id = format!("node-{}", uuid::Uuid::new_v4().simple());

        let peers = Arc::new(PeerBook::new());
        for address in &config.peers {
            // The address doubles as the id until the peer introduces
            // itself through an announcement.
            peers.add(address, address).await;
        }

        let audit: Arc<dyn AuditSink> = Arc::new(
            FileAudit::new(config.data_dir.join("audit.jsonl"))
                .map_err(|e| PipelineError::Registry(e.to_string()))?,
        );

        let broadcaster = Broadcaster::new(
            peers.clone(),
            Duration::from_millis(config.broadcast_timeout_ms),
        );
        let rules = Arc::new(RuleSet::builtin());

        let pipeline = Arc::new(Pipeline::new(
            registry.clone(),
            Arc::new(executor),
            rules,
            broadcaster,
            audit,
            peer_id.clone(),
            &config,
        ));

        let (subscriber, intake) = match &config.listen_addr {
            Some(addr) => {
                let (subscriber, mut rx) = Subscriber::bind(addr, peers.clone())
                    .await
                    .map_err(|e| PipelineError::Registry(e.to_string()))?;
                let intake_pipeline = pipeline.clone();
                let handle = tokio::spawn(async move {
                    while let Some(announcement) = rx.recv().await {
                        let (origin_peer, candidate) = announcement.into_candidate();
                        let name = candidate.name.clone();
                        match intake_pipeline
                            .clone()
                            .process(candidate, Origin::Peer(origin_peer))
                            .await
                        {
                            Ok(_) => info!("Merged peer tool: {}", name),
                            Err(e) => warn!("Discarded peer tool {}: {}", name, e),
                        }
                    }
                });
                (Some(subscriber), Some(handle))
            }
            None => (None, None),
        };

        let evictor = {
            let peers = peers.clone();
            let window = Duration::from_secs(config.peer_silence_secs);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(window).await;
                    peers.evict_stale(window).await;
                }
            })
        };

        info!("Node ready: {}", peer_id);
        Ok(Self {
            registry,
            pipeline,
            peers,
            peer_id,
            subscriber,
            intake,
            evictor,
        })
    }

    pub async fn submit_candidate(
        &self,
        candidate: Candidate,
    ) -> Result<ToolRecord, PipelineError> {
        self.pipeline
            .clone()
            .process(candidate, Origin::Local)
            .await
    }

    /// Replace an existing tool (or an in-flight run) with a new candidate.
    pub async fn supersede_candidate(
        &self,
        candidate: Candidate,
    ) -> Result<ToolRecord, PipelineError> {
        self.pipeline.clone().supersede(candidate).await
    }

    pub async fn get_tool_status(&self, name: &str) -> Option<ToolStatus> {
        self.registry.get(name).await.map(|r| r.status)
    }

    pub async fn list_active_tools(&self) -> Vec<(String, String)> {
        self.registry.active_tools().await
    }

    pub async fn invoke_tool(
        &self,
        name: &str,
        args: &[Value],
    ) -> Result<Outcome, PipelineError> {
        self.pipeline.invoke(name, args).await
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn peers(&self) -> &Arc<PeerBook> {
        &self.peers
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn listen_addr(&self) -> Option<std::net::SocketAddr> {
        self.subscriber.as_ref().map(|s| s.local_addr())
    }

    pub async fn close(self) -> Result<(), PipelineError> {
        if let Some(intake) = &self.intake {
            intake.abort();
        }
        if let Some(subscriber) = &self.subscriber {
            subscriber.stop();
        }
        self.evictor.abort();
        self.registry
            .close()
            .await
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        info!("Node stopped: {}", self.peer_id);
        Ok(())
    }
}
