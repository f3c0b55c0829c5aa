//! The Node actor: registries, lifecycle state machine, and the single
//! TCPROS listener that dispatches inbound topic/service sessions.
//!
//! The node runs as a single tokio task reached through a cloneable handle,
//! `NodeServerHandle`, which every `Publisher`/`Subscriber`/`ServiceClient`/
//! `Service` holds. Funneling every mutation through one actor loop avoids
//! any lock-ordering discipline between publications, subscriptions, and
//! services -- there's only ever one writer.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::*;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, RwLock};

use crate::error::{Ros1Error, Result};
use crate::master_client::MasterClient;
use crate::names::Name;
use crate::publisher::Publication;
use crate::service_server::{Service, ServiceHandlerFn};
use crate::subscriber::Subscription;
use crate::tcpros::{self, ConnectionHeader};
use crate::xmlrpc::Value;

/// Bring-up/shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninit,
    Starting,
    Running,
    ShuttingDown,
}

/// Bind addresses, timeouts, and pool sizes. Thread-priority/stack-size
/// knobs have no tokio analog and are not represented here.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_name: String,
    pub master_uri: String,
    pub xmlrpc_bind_addr: SocketAddr,
    pub tcpros_bind_addr: SocketAddr,
    pub xmlrpc_timeout: Duration,
    pub tcpros_timeout: Duration,
    pub tcpros_server_pool_size: usize,
    pub tcpros_client_pool_size: usize,
    pub xmlrpc_pool_size: usize,
    pub subscriber_queue_size: usize,
}

impl NodeConfig {
    pub fn new(master_uri: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            master_uri: master_uri.into(),
            xmlrpc_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            tcpros_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            xmlrpc_timeout: Duration::from_millis(3000),
            tcpros_timeout: Duration::from_millis(500),
            tcpros_server_pool_size: 32,
            tcpros_client_pool_size: 32,
            xmlrpc_pool_size: 16,
            subscriber_queue_size: 16,
        }
    }
}

pub(crate) struct PublicationEntry {
    pub publication: Publication,
    pub topic_type: String,
    pub md5sum: String,
}

/// Everything `accept_subscriber_connection` needs to splice a freshly
/// handshaked TCP stream into a publication's fan-out list, without handing
/// out the `Publication` itself (which would let a second owner race the
/// actor for its registry slot).
#[derive(Clone)]
pub(crate) struct PublicationHandles {
    pub streams: Arc<RwLock<Vec<TcpStream>>>,
    pub last_message: Arc<RwLock<Option<Vec<u8>>>>,
    pub response_header: ConnectionHeader,
}

pub(crate) struct SubscriptionEntry {
    pub subscription: Subscription,
    pub topic_type: String,
    pub md5sum: String,
}

pub(crate) struct ServiceEntry {
    pub service: Service,
    pub service_type: String,
    pub md5sum: String,
}

enum NodeCommand {
    AddPublication {
        topic: String,
        entry: PublicationEntry,
        reply: oneshot::Sender<()>,
    },
    RemovePublication {
        topic: String,
        reply: oneshot::Sender<()>,
    },
    RequestTopic {
        topic: String,
        reply: oneshot::Sender<Option<(String, String)>>, // (topic_type, md5sum) if published
    },
    GetPublicationHandles {
        topic: String,
        reply: oneshot::Sender<Option<PublicationHandles>>,
    },
    AddSubscription {
        topic: String,
        entry: SubscriptionEntry,
        reply: oneshot::Sender<()>,
    },
    RemoveSubscription {
        topic: String,
        reply: oneshot::Sender<()>,
    },
    ReconcilePublishers {
        topic: String,
        publishers: Vec<String>,
    },
    LookupSubscriptionType {
        topic: String,
        reply: oneshot::Sender<Option<(String, String)>>,
    },
    SubscribeExisting {
        topic: String,
        reply: oneshot::Sender<Option<tokio::sync::broadcast::Receiver<Vec<u8>>>>,
    },
    AddService {
        name: String,
        entry: ServiceEntry,
        reply: oneshot::Sender<()>,
    },
    RemoveService {
        name: String,
        reply: oneshot::Sender<()>,
    },
    LookupService {
        name: String,
        reply: oneshot::Sender<Option<(String, String, ServiceHandlerFn)>>,
    },
    SetParamSubscription {
        key: String,
        tx: watch::Sender<Value>,
        reply: oneshot::Sender<()>,
    },
    RemoveParamSubscription {
        key: String,
    },
    ParamUpdate {
        key: String,
        value: Value,
        reply: oneshot::Sender<bool>,
    },
    ListPublications {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    ListSubscriptions {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle used by every publisher/subscriber/service/param task to
/// talk to the Node actor and to the Master.
#[derive(Clone)]
pub struct NodeServerHandle {
    tx: mpsc::Sender<NodeCommand>,
    pub(crate) master: MasterClient,
    pub(crate) node_name: Name,
    pub(crate) xmlrpc_uri: String,
    pub(crate) host_addr: Ipv4Addr,
    pub(crate) tcpros_port: u16,
    pub(crate) config: Arc<NodeConfig>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl NodeServerHandle {
    pub fn node_name(&self) -> &Name {
        &self.node_name
    }

    pub fn xmlrpc_uri(&self) -> &str {
        &self.xmlrpc_uri
    }

    pub fn host_addr(&self) -> Ipv4Addr {
        self.host_addr
    }

    /// Port of the single shared TCPROS listener, used by the Slave server's
    /// `requestTopic` replies.
    pub fn tcpros_port(&self) -> u16 {
        self.tcpros_port
    }

    pub fn master(&self) -> &MasterClient {
        &self.master
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// True once the Node has begun shutting down; checked between TCPROS
    /// frames by session loops as the cooperative cancellation signal (spec
    /// §5 "Cancellation").
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn send(&self, make: impl FnOnce(oneshot::Sender<()>) -> NodeCommand) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Ros1Error::NotFound("node actor has shut down".into()))?;
        reply_rx
            .await
            .map_err(|_| Ros1Error::NotFound("node actor dropped the reply channel".into()))
    }

    pub(crate) async fn add_publication(&self, topic: String, entry: PublicationEntry) -> Result<()> {
        self.send(|reply| NodeCommand::AddPublication { topic, entry, reply })
            .await
    }

    /// Combined convenience used by `Publication`'s drop-triggered cleanup
    /// path.
    pub async fn unregister_publisher(&self, topic: &str) -> Result<()> {
        self.master
            .unregister_publisher(topic, &self.xmlrpc_uri)
            .await?;
        self.send(|reply| NodeCommand::RemovePublication {
            topic: topic.to_owned(),
            reply,
        })
        .await
    }

    pub(crate) async fn add_subscription(&self, topic: String, entry: SubscriptionEntry) -> Result<()> {
        self.send(|reply| NodeCommand::AddSubscription { topic, entry, reply })
            .await
    }

    pub async fn unregister_subscriber(&self, topic: &str) -> Result<()> {
        self.master
            .unregister_subscriber(topic, &self.xmlrpc_uri)
            .await?;
        self.send(|reply| NodeCommand::RemoveSubscription {
            topic: topic.to_owned(),
            reply,
        })
        .await
    }

    pub(crate) async fn add_service(&self, name: String, entry: ServiceEntry) -> Result<()> {
        self.send(|reply| NodeCommand::AddService { name, entry, reply })
            .await
    }

    pub async fn unregister_service(&self, name: &str, service_api: &str) -> Result<()> {
        self.master.unregister_service(name, service_api).await?;
        self.send(|reply| NodeCommand::RemoveService {
            name: name.to_owned(),
            reply,
        })
        .await
    }

    /// Reconciles a subscription's publisher list against what `publisherUpdate`
    /// reported.
    pub(crate) async fn reconcile_publishers(&self, topic: String, publishers: Vec<String>) {
        let _ = self
            .tx
            .send(NodeCommand::ReconcilePublishers { topic, publishers })
            .await;
    }

    /// Used by the Slave server's `requestTopic` handler: replies with our
    /// TCPROS endpoint only if `topic` is one we actually publish.
    pub(crate) async fn request_topic(&self, topic: &str) -> Option<(String, String)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::RequestTopic {
                topic: topic.to_owned(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub(crate) async fn get_publication_handles(&self, topic: &str) -> Option<PublicationHandles> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::GetPublicationHandles {
                topic: topic.to_owned(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub(crate) async fn subscribe_existing(
        &self,
        topic: &str,
    ) -> Option<tokio::sync::broadcast::Receiver<Vec<u8>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::SubscribeExisting {
                topic: topic.to_owned(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    /// Rebuilds the handle with the XMLRPC URI's real port once the Slave
    /// server has actually bound its listener (`Node::spawn` only knows the
    /// configured bind address, which may be port 0).
    pub(crate) fn with_resolved_xmlrpc_port(&self, port: u16) -> Self {
        let mut copy = self.clone();
        copy.xmlrpc_uri = format!("http://{}:{}/", self.host_addr, port);
        copy
    }

    pub(crate) async fn lookup_service(
        &self,
        name: &str,
    ) -> Option<(String, String, ServiceHandlerFn)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::LookupService {
                name: name.to_owned(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub(crate) async fn lookup_subscription_type(&self, topic: &str) -> Option<(String, String)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::LookupSubscriptionType {
                topic: topic.to_owned(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub(crate) async fn set_param_subscription(&self, key: String, tx: watch::Sender<Value>) -> Result<()> {
        self.send(|reply| NodeCommand::SetParamSubscription { key, tx, reply })
            .await
    }

    pub(crate) async fn remove_param_subscription(&self, key: String) {
        let _ = self.tx.send(NodeCommand::RemoveParamSubscription { key }).await;
    }

    /// Delivers a `paramUpdate` call from the Master to the matching
    /// subscription, if any. Returns whether a subscriber was found, which
    /// the Slave server uses to decide its `(1,"",0)` reply (it always
    /// replies success regardless, but we keep the signal for logging).
    pub(crate) async fn param_update(&self, key: String, value: Value) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::ParamUpdate { key, value, reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    pub(crate) async fn list_publications(&self) -> Vec<(String, String)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::ListPublications { reply: reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub(crate) async fn list_subscriptions(&self) -> Vec<(String, String)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(NodeCommand::ListSubscriptions { reply: reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Sets the exit flag (waking cooperative session loops), self-pings
    /// our own XMLRPC port to unblock the listener's accept loop, then waits
    /// for the actor to finish tearing everything down.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(NodeCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| Ros1Error::NotFound("node actor already gone".into()))?;
        // Unblocks any XMLRPC listener accept-loop that doesn't see the
        // state flip otherwise. Errors are expected once the listener has
        // already exited; ignore them.
        let _ = self.master.get_pid(&self.xmlrpc_uri).await;
        reply_rx
            .await
            .map_err(|_| Ros1Error::NotFound("node actor dropped the shutdown reply".into()))
    }
}

/// The Node actor. Owns every registry; all mutation is funneled through its
/// single command-processing loop, so there is no concurrent lock
/// acquisition and no ordering to get wrong.
pub(crate) struct Node {
    config: Arc<NodeConfig>,
    state: NodeState,
    publications: HashMap<String, PublicationEntry>,
    subscriptions: HashMap<String, SubscriptionEntry>,
    services: HashMap<String, ServiceEntry>,
    param_subscriptions: HashMap<String, watch::Sender<Value>>,
    tcpros_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    /// Binds the TCPROS listener, spawns its accept loop, and returns a
    /// handle ready for the user to advertise/subscribe against. The Node
    /// actor itself then runs until `shutdown()` is called.
    pub(crate) async fn spawn(config: NodeConfig) -> Result<NodeServerHandle> {
        let config = Arc::new(config);
        let node_name = Name::new(&config.node_name)?;

        let tcpros_listener = TcpListener::bind(config.tcpros_bind_addr).await?;
        let tcpros_addr = tcpros_listener.local_addr()?;

        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_owned());
        let host_ip = resolve_host_ip(&hostname);

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let master = MasterClient::new(config.master_uri.clone(), node_name.to_string());

        // The XMLRPC Slave server is spawned by NodeHandle::new once it has
        // a NodeServerHandle to dispatch into (see slave_server::spawn).
        let xmlrpc_addr = config.xmlrpc_bind_addr;
        let xmlrpc_uri_placeholder = format!("http://{}:{}/", host_ip, xmlrpc_addr.port());

        let handle = NodeServerHandle {
            tx: cmd_tx,
            master,
            node_name,
            xmlrpc_uri: xmlrpc_uri_placeholder,
            host_addr: host_ip,
            tcpros_port: tcpros_addr.port(),
            config: config.clone(),
            shutdown_rx,
        };

        let mut node = Node {
            config,
            state: NodeState::Starting,
            publications: HashMap::new(),
            subscriptions: HashMap::new(),
            services: HashMap::new(),
            param_subscriptions: HashMap::new(),
            tcpros_addr,
            shutdown_tx,
        };
        node.state = NodeState::Running;

        let node_handle_for_listener = handle.clone();
        tokio::spawn(async move {
            Node::tcpros_accept_loop(tcpros_listener, node_handle_for_listener).await;
        });

        tokio::spawn(async move {
            node.run(cmd_rx).await;
        });

        Ok(handle)
    }

    async fn run(&mut self, mut cmd_rx: mpsc::Receiver<NodeCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                NodeCommand::AddPublication { topic, entry, reply } => {
                    self.publications.insert(topic, entry);
                    let _ = reply.send(());
                }
                NodeCommand::RemovePublication { topic, reply } => {
                    self.publications.remove(&topic);
                    let _ = reply.send(());
                }
                NodeCommand::RequestTopic { topic, reply } => {
                    let info = self
                        .publications
                        .get(&topic)
                        .map(|e| (e.topic_type.clone(), e.md5sum.clone()));
                    let _ = reply.send(info);
                }
                NodeCommand::GetPublicationHandles { topic, reply } => {
                    let handles = self.publications.get(&topic).map(|e| e.publication.handles());
                    let _ = reply.send(handles);
                }
                NodeCommand::AddSubscription { topic, entry, reply } => {
                    self.subscriptions.insert(topic, entry);
                    let _ = reply.send(());
                }
                NodeCommand::RemoveSubscription { topic, reply } => {
                    self.subscriptions.remove(&topic);
                    let _ = reply.send(());
                }
                NodeCommand::ReconcilePublishers { topic, publishers } => {
                    if let Some(entry) = self.subscriptions.get(&topic) {
                        entry.subscription.update_publishers(publishers).await;
                    } else {
                        debug!("publisherUpdate for unknown topic {topic}, ignoring");
                    }
                }
                NodeCommand::LookupSubscriptionType { topic, reply } => {
                    let info = self
                        .subscriptions
                        .get(&topic)
                        .map(|e| (e.topic_type.clone(), e.md5sum.clone()));
                    let _ = reply.send(info);
                }
                NodeCommand::SubscribeExisting { topic, reply } => {
                    let rx = self
                        .subscriptions
                        .get(&topic)
                        .map(|e| e.subscription.subscribe_more());
                    let _ = reply.send(rx);
                }
                NodeCommand::AddService { name, entry, reply } => {
                    self.services.insert(name, entry);
                    let _ = reply.send(());
                }
                NodeCommand::RemoveService { name, reply } => {
                    self.services.remove(&name);
                    let _ = reply.send(());
                }
                NodeCommand::LookupService { name, reply } => {
                    let info = self.services.get(&name).map(|e| {
                        (
                            e.service_type.clone(),
                            e.md5sum.clone(),
                            e.service.handler.clone(),
                        )
                    });
                    let _ = reply.send(info);
                }
                NodeCommand::SetParamSubscription { key, tx, reply } => {
                    self.param_subscriptions.insert(key, tx);
                    let _ = reply.send(());
                }
                NodeCommand::RemoveParamSubscription { key } => {
                    self.param_subscriptions.remove(&key);
                }
                NodeCommand::ParamUpdate { key, value, reply } => {
                    let delivered = if let Some(tx) = self.param_subscriptions.get(&key) {
                        let _ = tx.send(value);
                        true
                    } else {
                        false
                    };
                    let _ = reply.send(delivered);
                }
                NodeCommand::ListPublications { reply } => {
                    let list = self
                        .publications
                        .iter()
                        .map(|(topic, e)| (topic.clone(), e.topic_type.clone()))
                        .collect();
                    let _ = reply.send(list);
                }
                NodeCommand::ListSubscriptions { reply } => {
                    let list = self
                        .subscriptions
                        .iter()
                        .map(|(topic, e)| (topic.clone(), e.topic_type.clone()))
                        .collect();
                    let _ = reply.send(list);
                }
                NodeCommand::Shutdown { reply } => {
                    self.state = NodeState::ShuttingDown;
                    let _ = self.shutdown_tx.send(true);
                    // Drop every registry entry, which aborts their
                    // background tasks (ChildTask-on-drop) and closes
                    // sockets.
                    self.publications.clear();
                    self.subscriptions.clear();
                    self.services.clear();
                    self.param_subscriptions.clear();
                    self.state = NodeState::Uninit;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("node actor exited");
    }

    /// The single shared TCPROS listener: accepts a connection, reads the
    /// caller's headers, and dispatches to the publication or service the
    /// headers name.
    async fn tcpros_accept_loop(listener: TcpListener, node_handle: NodeServerHandle) {
        loop {
            if node_handle.is_shutting_down() {
                break;
            }
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("tcpros accept failed: {e}");
                    continue;
                }
            };
            let node_handle = node_handle.clone();
            tokio::spawn(async move {
                if let Err(e) = Node::handle_tcpros_connection(stream, peer_addr, node_handle).await
                {
                    debug!("tcpros session from {peer_addr} ended: {e}");
                }
            });
        }
    }

    async fn handle_tcpros_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        node_handle: NodeServerHandle,
    ) -> Result<()> {
        let header = tcpros::receive_header(&mut stream).await?;
        if let Some(topic) = header.topic.clone() {
            Node::handle_topic_session(stream, peer_addr, topic, header, node_handle).await
        } else if let Some(service) = header.service.clone() {
            crate::service_server::handle_service_session(stream, service, header, node_handle)
                .await
                .map_err(Into::into)
        } else {
            Err(Ros1Error::MalformedHeader(
                "connection header named neither 'topic' nor 'service'".into(),
            ))
        }
    }

    async fn handle_topic_session(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        topic: String,
        header: ConnectionHeader,
        node_handle: NodeServerHandle,
    ) -> Result<()> {
        let Some((topic_type, md5sum)) = node_handle.request_topic(&topic).await else {
            return Err(Ros1Error::NotFound(format!(
                "{topic} is not a topic we publish"
            )));
        };
        tcpros::check_type_and_md5sum(&topic_type, &md5sum, &header)?;

        if header.probe {
            let response_header = ConnectionHeader {
                caller_id: node_handle.node_name.to_string(),
                topic: Some(topic.clone()),
                topic_type,
                md5sum: Some(md5sum),
                ..Default::default()
            };
            tcpros::send_header(&mut stream, &response_header, false).await?;
            return Ok(());
        }

        crate::publisher::accept_subscriber_connection(
            node_handle, topic, stream, peer_addr, header,
        )
        .await
    }
}

fn resolve_host_ip(hostname: &str) -> Ipv4Addr {
    use std::net::ToSocketAddrs;
    (hostname, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| {
            addrs.find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                _ => None,
            })
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

