//! Node assembly: wiring the transport planes, consensus core, registry
//! client, and state machine into one running peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use ledgermesh_consensus::{
    Acceptor, AcceptorState, ConsensusError, DirectorySource, Executor, LearnCollector,
    LearnRecord, PeerDirectory, PeerMessage, PeerRecord, Proposer, ReputationController,
    ReputationStore, VerificationEngine,
};
use ledgermesh_ledger::StateMachine;
use ledgermesh_registry::{RegisterOutcome, RegistryClient};
use ledgermesh_transport::{request_json, spawn_listener, Listener, MessageHandler, PortLayout};

use crate::config::NodeConfig;

/// Adapts the registry HTTP client to the consensus core's trait seams, so
/// the core itself never speaks HTTP.
struct RegistryBackend {
    client: RegistryClient,
}

#[async_trait]
impl ReputationStore for RegistryBackend {
    async fn increase(&self, node_id: &str, amount: i64) -> Result<()> {
        self.client
            .increase_reputation(node_id, Some(amount))
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn decrease(&self, node_id: &str, amount: i64) -> Result<()> {
        self.client
            .decrease_reputation(node_id, Some(amount))
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

#[async_trait]
impl DirectorySource for RegistryBackend {
    async fn fetch_peers(&self) -> Result<HashMap<String, PeerRecord>> {
        let nodes = self.client.nodes().await?;
        Ok(nodes
            .into_iter()
            .map(|(id, entry)| {
                (
                    id,
                    PeerRecord {
                        url: entry.url,
                        reputation: entry.reputation,
                    },
                )
            })
            .collect())
    }
}

/// A running LedgerMesh peer.
///
/// Owns the four inbound listeners, the verification dispatcher, and the
/// proposer the operator surface drives. All consensus state hangs off the
/// shared handles created in [`Node::new`]; nothing is process-global.
pub struct Node {
    config: NodeConfig,
    registry: RegistryClient,
    directory: Arc<PeerDirectory>,
    executor: Arc<Executor>,
    acceptor: Arc<Acceptor>,
    proposer: Arc<Proposer>,
    verification: Arc<VerificationEngine>,
    listeners: Vec<Listener>,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
}

impl Node {
    /// Build a node around an externally supplied state machine.
    pub fn new(config: NodeConfig, state_machine: Arc<dyn StateMachine>) -> Self {
        let registry = RegistryClient::new(&config.registry_url);
        let backend = Arc::new(RegistryBackend {
            client: registry.clone(),
        });

        let directory = Arc::new(PeerDirectory::new(config.node_id.clone()));
        let executor = Arc::new(Executor::new(state_machine));
        let reputation = Arc::new(ReputationController::new(
            Arc::clone(&directory),
            Arc::clone(&backend) as Arc<dyn ReputationStore>,
        ));
        let verification = Arc::new(VerificationEngine::new(
            Arc::clone(&directory),
            Arc::clone(&executor),
            Arc::clone(&reputation),
            config.consensus.clone(),
        ));
        let acceptor_state = Arc::new(AcceptorState::new());
        let acceptor = Arc::new(Acceptor::new(
            Arc::clone(&directory),
            Arc::clone(&executor),
            Arc::clone(&verification),
            Arc::clone(&acceptor_state),
            config.consensus.clone(),
        ));
        let proposer = Arc::new(Proposer::new(
            Arc::clone(&directory),
            Arc::clone(&backend) as Arc<dyn DirectorySource>,
            Arc::clone(&executor),
            Arc::clone(&reputation),
            acceptor_state,
            Arc::new(LearnCollector::new()),
            config.consensus.clone(),
        ));

        Self {
            config,
            registry,
            directory,
            executor,
            acceptor,
            proposer,
            verification,
            listeners: Vec::new(),
            dispatcher: None,
        }
    }

    /// Join the cluster and begin serving.
    ///
    /// Startup sequence: announce to the registry, pull the current node
    /// list, push a registration record to every existing peer's directory
    /// port, then bring up the four listeners and the verification
    /// dispatcher.
    pub async fn start(&mut self) -> Result<()> {
        let node_id = self.config.node_id.clone();
        let node_url = self.config.node_url();
        info!(node = %node_id, url = %node_url, mode = %self.config.consensus.mode, "starting node");

        let outcome = self
            .registry
            .register(&node_id, &node_url)
            .await
            .context("registering with the registry")?;
        let own_reputation = match outcome {
            RegisterOutcome::Created => ledgermesh_consensus::DEFAULT_REPUTATION,
            RegisterOutcome::AlreadyRegistered => {
                // Rejoining after a restart: our score survived us.
                self.registry.reputation(&node_id).await.unwrap_or(0)
            }
        };

        let nodes = self
            .registry
            .nodes()
            .await
            .context("fetching the node list from the registry")?;
        for (peer_id, entry) in &nodes {
            self.directory.upsert(
                peer_id.clone(),
                PeerRecord {
                    url: entry.url.clone(),
                    reputation: entry.reputation,
                },
            );
        }
        self.directory.upsert(
            node_id.clone(),
            PeerRecord {
                url: node_url.clone(),
                reputation: own_reputation,
            },
        );

        self.announce_to_peers(&node_id, &node_url, own_reputation)
            .await;
        self.spawn_listeners().await?;
        self.dispatcher = Some(self.verification.start());

        info!(node = %node_id, peers = self.directory.len(), "node started");
        Ok(())
    }

    /// Leave the cluster: deregister and tear the listeners down.
    pub async fn stop(&mut self) -> Result<()> {
        info!(node = %self.config.node_id, "stopping node");
        if let Err(e) = self.registry.deregister(&self.config.node_id).await {
            warn!(error = %e, "deregistration failed");
        }
        for listener in self.listeners.drain(..) {
            listener.shutdown();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        Ok(())
    }

    /// Drive one client command through consensus. Returns the committed
    /// action.
    pub async fn submit(&self, command: Value) -> Result<Value, ConsensusError> {
        self.proposer.propose(command).await
    }

    /// Local-only balance read; never touches the network.
    pub fn query(&self, name: &str) -> Option<f64> {
        self.executor.state_machine().query(name)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Push a one-line registration record to every already-known peer so
    /// their directories pick us up without polling the registry.
    async fn announce_to_peers(&self, node_id: &str, node_url: &str, reputation: i64) {
        let mut record = serde_json::Map::new();
        record.insert(
            node_id.to_string(),
            serde_json::json!({ "url": node_url, "reputation": reputation }),
        );
        let record = Value::Object(record);
        for (peer_id, peer) in self.directory.snapshot() {
            if peer_id == node_id {
                continue;
            }
            let Ok(endpoint) = peer.endpoint() else {
                warn!(peer = %peer_id, url = %peer.url, "bad peer url, skipping announcement");
                continue;
            };
            match request_json(&endpoint.directory_addr(), &record).await {
                Ok(reply) => debug!(peer = %peer_id, ?reply, "announced to peer"),
                Err(e) => warn!(peer = %peer_id, error = %e, "peer announcement failed"),
            }
        }
    }

    async fn spawn_listeners(&mut self) -> Result<()> {
        let ports = PortLayout::new(self.config.port);
        let bind = |port: u16| -> Result<SocketAddr> {
            format!("{}:{}", self.config.bind_address, port)
                .parse()
                .context("bind_address must be an IP address")
        };

        self.listeners.push(
            spawn_listener(
                "protocol",
                bind(ports.protocol())?,
                Arc::new(ProtocolPlane {
                    acceptor: Arc::clone(&self.acceptor),
                }),
            )
            .await?,
        );
        self.listeners.push(
            spawn_listener(
                "verify",
                bind(ports.verify())?,
                Arc::new(VerifyPlane {
                    acceptor: Arc::clone(&self.acceptor),
                }),
            )
            .await?,
        );
        self.listeners.push(
            spawn_listener(
                "learn",
                bind(ports.learn())?,
                Arc::new(LearnPlane {
                    proposer: Arc::clone(&self.proposer),
                }),
            )
            .await?,
        );
        self.listeners.push(
            spawn_listener(
                "directory",
                bind(ports.directory())?,
                Arc::new(DirectoryPlane {
                    directory: Arc::clone(&self.directory),
                }),
            )
            .await?,
        );
        Ok(())
    }
}

/// Protocol plane: prepare, propose, the legacy learn envelope, and
/// feasibility queries.
struct ProtocolPlane {
    acceptor: Arc<Acceptor>,
}

#[async_trait]
impl MessageHandler for ProtocolPlane {
    async fn handle(&self, message: Value, peer: SocketAddr) -> Option<Value> {
        if message.get("type").is_some() {
            match serde_json::from_value::<PeerMessage>(message) {
                Ok(PeerMessage::Prepare {
                    proposal_number,
                    proposer_id,
                }) => {
                    let reply = self.acceptor.handle_prepare(proposal_number, proposer_id);
                    serde_json::to_value(reply).ok()
                }
                Ok(PeerMessage::Propose {
                    proposal_number,
                    action,
                    proposer_id,
                }) => {
                    let verdict = self
                        .acceptor
                        .handle_propose(proposal_number, action, proposer_id);
                    serde_json::to_value(verdict).ok()
                }
                Ok(PeerMessage::Query { action }) => {
                    serde_json::to_value(self.acceptor.handle_query(&action)).ok()
                }
                Ok(other) => {
                    debug!(%peer, message = ?other, "message on the wrong plane, dropped");
                    None
                }
                Err(e) => {
                    warn!(%peer, error = %e, "malformed protocol message dropped");
                    None
                }
            }
        } else if message.get("action").and_then(Value::as_str) == Some("learn") {
            // Legacy learn envelope from the classic protocol variant.
            let data = message.get("data")?;
            Some(Value::String(
                self.acceptor.handle_legacy_learn(data).to_string(),
            ))
        } else if message.get("action").is_some() {
            // A bare command: judge feasibility locally.
            serde_json::to_value(self.acceptor.handle_query(&message)).ok()
        } else {
            warn!(%peer, "unrecognized protocol message dropped");
            None
        }
    }
}

/// Verification plane: acceptor-to-acceptor vote broadcasts.
struct VerifyPlane {
    acceptor: Arc<Acceptor>,
}

#[async_trait]
impl MessageHandler for VerifyPlane {
    async fn handle(&self, message: Value, peer: SocketAddr) -> Option<Value> {
        match serde_json::from_value::<PeerMessage>(message) {
            Ok(PeerMessage::Verify {
                proposal_number,
                status,
                action,
                node_id,
                proposer_id,
            }) => {
                self.acceptor
                    .handle_verify(proposal_number, status, action, node_id, proposer_id);
            }
            Ok(other) => debug!(%peer, message = ?other, "non-verify message on verify plane"),
            Err(e) => warn!(%peer, error = %e, "malformed verify message dropped"),
        }
        None
    }
}

/// Learn plane: verification outcomes addressed to this node as proposer.
struct LearnPlane {
    proposer: Arc<Proposer>,
}

#[async_trait]
impl MessageHandler for LearnPlane {
    async fn handle(&self, message: Value, peer: SocketAddr) -> Option<Value> {
        match serde_json::from_value::<PeerMessage>(message) {
            Ok(PeerMessage::Learn {
                proposal_number,
                action,
                node_id,
                malicious_nodes,
            }) => {
                self.proposer.record_learn(
                    proposal_number,
                    LearnRecord {
                        node_id,
                        action,
                        malicious_nodes,
                    },
                );
            }
            Ok(other) => debug!(%peer, message = ?other, "non-learn message on learn plane"),
            Err(e) => warn!(%peer, error = %e, "malformed learn message dropped"),
        }
        None
    }
}

/// Directory plane: one-line registration records from joining peers.
struct DirectoryPlane {
    directory: Arc<PeerDirectory>,
}

#[async_trait]
impl MessageHandler for DirectoryPlane {
    async fn handle(&self, message: Value, peer: SocketAddr) -> Option<Value> {
        let Some(entries) = message.as_object() else {
            return Some(serde_json::json!({
                "status": "error",
                "message": "Invalid registration data format."
            }));
        };
        let mut accepted = 0;
        for (node_id, details) in entries {
            match serde_json::from_value::<PeerRecord>(details.clone()) {
                Ok(record) => {
                    info!(%peer, node = %node_id, url = %record.url, "peer registration received");
                    self.directory.upsert(node_id.clone(), record);
                    accepted += 1;
                }
                Err(e) => warn!(%peer, node = %node_id, error = %e, "invalid registration record"),
            }
        }
        if accepted > 0 {
            Some(serde_json::json!({
                "status": "success",
                "message": "Node registration processed successfully."
            }))
        } else {
            Some(serde_json::json!({
                "status": "error",
                "message": "Invalid registration data format."
            }))
        }
    }
}
