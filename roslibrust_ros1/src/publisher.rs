//! Locally-advertised topics: the `Publisher<T>` handle returned by
//! `NodeHandle::advertise`, and the `Publication` bookkeeping the Node
//! registry keeps per topic.
//!
//! Topics don't each get their own listener. `Node`'s one shared TCPROS
//! accept loop reads the caller's header and hands the already-handshaked
//! stream to [`accept_subscriber_connection`] here, which splices it into
//! the matching `Publication`'s fan-out list.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use abort_on_drop::ChildTask;
use log::*;
use roslibrust_common::{traits::Publish, Result as CommonResult, RosMessageType};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use crate::error::Result;
use crate::names::Name;
use crate::node::{NodeServerHandle, PublicationHandles};
use crate::tcpros::{self, ConnectionHeader};

/// Handle returned by `NodeHandle::advertise::<T>()`. Queues serialized
/// messages onto the publication's fan-out task; dropping every clone of
/// this handle's underlying sender tears the publication down.
pub struct Publisher<T> {
    topic_name: String,
    sender: mpsc::Sender<Vec<u8>>,
    phantom: PhantomData<T>,
}

impl<T: RosMessageType> Publisher<T> {
    pub(crate) fn new(topic_name: &str, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            sender,
            phantom: PhantomData,
        }
    }

    /// Queues `data` to be sent on the topic. Returns once the message is
    /// queued, not once it's actually written to every subscriber socket.
    pub async fn publish(&self, data: &T) -> CommonResult<()> {
        let data = serde_rosmsg::to_vec(&data)
            .map_err(|e| crate::error::Ros1Error::Other(anyhow::anyhow!(e.to_string())))?;
        self.sender
            .send(data)
            .await
            .map_err(|_| crate::error::Ros1Error::NotFound("publication has been torn down".into()))?;
        trace!("queued message on topic {}", self.topic_name);
        Ok(())
    }
}

impl<T: RosMessageType> Publish<T> for Publisher<T> {
    async fn publish(&self, data: &T) -> CommonResult<()> {
        Publisher::publish(self, data).await
    }
}

/// Publishes pre-serialized message bytes without a compile-time message
/// type. Used for bag playback and other dynamically-typed scenarios.
pub struct PublisherAny {
    topic_name: String,
    sender: mpsc::Sender<Vec<u8>>,
}

impl PublisherAny {
    pub(crate) fn new(topic_name: &str, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            sender,
        }
    }

    /// `data` must already be the serialized message body, not including the
    /// length prefix; that's added by the publish task's framing.
    pub async fn publish(&self, data: Vec<u8>) -> Result<()> {
        self.sender
            .send(data)
            .await
            .map_err(|_| crate::error::Ros1Error::NotFound("publication has been torn down".into()))?;
        trace!("queued raw message on topic {}", self.topic_name);
        Ok(())
    }
}

/// Node-side bookkeeping for one advertised topic. Holds the fan-out state
/// and drives the background task that writes queued messages to every
/// connected subscriber stream.
pub(crate) struct Publication {
    topic_type: String,
    streams: Arc<RwLock<Vec<TcpStream>>>,
    last_message: Arc<RwLock<Option<Vec<u8>>>>,
    response_header: ConnectionHeader,
    publish_sender: mpsc::WeakSender<Vec<u8>>,
    _publish_task: ChildTask<()>,
}

impl Publication {
    /// Sets up a publication's fan-out task. Returns the bookkeeping struct
    /// plus the `mpsc::Sender` handed out to `Publisher<T>`/`PublisherAny`;
    /// dropping every clone of that sender drains the publish task and
    /// triggers node-side unregistration (see `publish_task`).
    pub(crate) async fn new(
        node_name: &Name,
        latching: bool,
        topic_name: &str,
        queue_size: usize,
        msg_definition: &str,
        md5sum: &str,
        topic_type: &str,
        node_handle: NodeServerHandle,
    ) -> (Self, mpsc::Sender<Vec<u8>>) {
        let response_header = ConnectionHeader {
            caller_id: node_name.to_string(),
            latching,
            msg_definition: msg_definition.to_owned(),
            md5sum: Some(md5sum.to_owned()),
            topic: Some(topic_name.to_owned()),
            topic_type: topic_type.to_owned(),
            ..Default::default()
        };
        trace!("publisher response header: {response_header:?}");

        let (sender, receiver) = mpsc::channel::<Vec<u8>>(queue_size);
        let streams = Arc::new(RwLock::new(Vec::new()));
        let last_message = Arc::new(RwLock::new(None));

        let streams_copy = streams.clone();
        let last_message_copy = last_message.clone();
        let topic_name_copy = topic_name.to_owned();
        let publish_task = tokio::spawn(async move {
            Self::publish_task(
                receiver,
                streams_copy,
                last_message_copy,
                node_handle,
                topic_name_copy,
            )
            .await
        });

        let sender_copy = sender.clone();
        (
            Self {
                topic_type: topic_type.to_owned(),
                streams,
                last_message,
                response_header,
                publish_sender: sender.downgrade(),
                _publish_task: publish_task.into(),
            },
            sender_copy,
        )
    }

    /// Returns `None` if the last `Publisher<T>` was dropped in the window
    /// between that drop and the Node actor processing the resulting
    /// unregistration -- a narrow, harmless timing edge case.
    pub(crate) fn get_sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.publish_sender.clone().upgrade()
    }

    pub(crate) fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub(crate) fn handles(&self) -> PublicationHandles {
        PublicationHandles {
            streams: self.streams.clone(),
            last_message: self.last_message.clone(),
            response_header: self.response_header.clone(),
        }
    }

    /// Drains queued messages and writes each to every connected subscriber
    /// stream, dropping any stream whose write fails. Exits (and triggers
    /// unregistration) once every `Publisher<T>` clone has been dropped.
    async fn publish_task(
        mut rx: mpsc::Receiver<Vec<u8>>,
        streams: Arc<RwLock<Vec<TcpStream>>>,
        last_message: Arc<RwLock<Option<Vec<u8>>>>,
        node_handle: NodeServerHandle,
        topic: String,
    ) {
        debug!("publish task started for {topic}");
        loop {
            match rx.recv().await {
                Some(msg) => {
                    let mut streams = streams.write().await;
                    let mut dead = Vec::new();
                    for (idx, stream) in streams.iter_mut().enumerate() {
                        if let Err(e) = tcpros::write_frame(stream, &msg).await {
                            debug!("subscriber stream write failed, dropping: {e}");
                            dead.push(idx);
                        }
                    }
                    for (removed, idx) in dead.into_iter().enumerate() {
                        streams.remove(idx - removed);
                    }
                    *last_message.write().await = Some(msg);
                }
                None => {
                    debug!("last publisher handle dropped for {topic}, unregistering");
                    // Spawned so dropping the Publication (which owns this
                    // task) doesn't cancel the cleanup it's performing.
                    tokio::spawn(async move {
                        let _ = node_handle.unregister_publisher(&topic).await;
                    });
                    break;
                }
            }
        }
        debug!("publish task exited for {topic}");
    }
}

/// Invoked by the Node's shared TCPROS accept loop once it has read the
/// caller's header and confirmed `topic` is one we publish. Writes our
/// response header, sends a latched message if configured, then hands the
/// stream off to the publish task's fan-out list.
pub(crate) async fn accept_subscriber_connection(
    node_handle: NodeServerHandle,
    topic: String,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    _caller_header: ConnectionHeader,
) -> Result<()> {
    let Some(handles) = node_handle.get_publication_handles(&topic).await else {
        return Err(crate::error::Ros1Error::NotFound(format!(
            "publication for {topic} disappeared mid-handshake"
        )));
    };

    let response_bytes = handles.response_header.to_bytes(false)?;
    stream.write_all(&response_bytes).await?;

    if handles.response_header.latching {
        if let Some(last) = handles.last_message.read().await.as_ref() {
            if let Err(e) = tcpros::write_frame(&mut stream, last).await {
                warn!("failed to send latched message to {peer_addr}: {e}");
            }
        }
    }

    let mut streams = handles.streams.write().await;
    streams.push(stream);
    info!("subscriber {peer_addr} connected to {topic}");
    Ok(())
}
