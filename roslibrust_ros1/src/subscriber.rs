//! Locally-subscribed topics: the `Subscriber<T>` handle returned by
//! `NodeHandle::subscribe`, and the `Subscription` bookkeeping that
//! reconciles our set of outbound TCPROS connections against the publisher
//! list the Master reports.
//!
//! One connection task per publisher URI, supervised by a small reconcile
//! loop that diffs the latest `publisherUpdate` against what's currently
//! connected. Messages fan out to every `Subscriber<T>` clone of the same
//! topic over a `broadcast` channel, since TCPROS gives us raw bytes and
//! ROS allows more than one local subscriber handle per topic.

use std::collections::{HashMap, HashSet};

use abort_on_drop::ChildTask;
use log::*;
use roslibrust_common::{traits::Subscribe, Result as CommonResult, RosMessageType};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Ros1Error, Result};
use crate::node::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};
use crate::xmlrpc::{self, Value};

const CHANNEL_PROBE_PARAM: &str = "TCPROS";

/// Node-side bookkeeping for one subscribed topic.
pub(crate) struct Subscription {
    data_tx: broadcast::Sender<Vec<u8>>,
    update_tx: mpsc::Sender<Vec<String>>,
    _reconcile_task: ChildTask<()>,
}

impl Subscription {
    pub(crate) fn new(
        topic_name: String,
        topic_type: String,
        md5sum: String,
        queue_size: usize,
        node_handle: NodeServerHandle,
    ) -> (Self, broadcast::Receiver<Vec<u8>>) {
        let (data_tx, data_rx) = broadcast::channel(queue_size.max(1));
        let (update_tx, update_rx) = mpsc::channel(8);

        let data_tx_copy = data_tx.clone();
        let reconcile_task = tokio::spawn(async move {
            reconcile_loop(
                topic_name,
                topic_type,
                md5sum,
                update_rx,
                data_tx_copy,
                node_handle,
            )
            .await
        });

        (
            Self {
                data_tx,
                update_tx,
                _reconcile_task: reconcile_task.into(),
            },
            data_rx,
        )
    }

    pub(crate) fn subscribe_more(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_tx.subscribe()
    }

    /// Pushes a new full publisher URI list, from either the initial
    /// `registerSubscriber` response or a subsequent `publisherUpdate` call.
    pub(crate) async fn update_publishers(&self, uris: Vec<String>) {
        let _ = self.update_tx.send(uris).await;
    }
}

async fn reconcile_loop(
    topic_name: String,
    topic_type: String,
    md5sum: String,
    mut update_rx: mpsc::Receiver<Vec<String>>,
    data_tx: broadcast::Sender<Vec<u8>>,
    node_handle: NodeServerHandle,
) {
    let mut connections: HashMap<String, ChildTask<()>> = HashMap::new();
    while let Some(uris) = update_rx.recv().await {
        let wanted: HashSet<String> = uris.into_iter().collect();
        connections.retain(|uri, _| wanted.contains(uri));
        for uri in wanted {
            if connections.contains_key(&uri) {
                continue;
            }
            let topic_name = topic_name.clone();
            let topic_type = topic_type.clone();
            let md5sum = md5sum.clone();
            let data_tx = data_tx.clone();
            let node_handle = node_handle.clone();
            let uri_copy = uri.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = connect_and_stream(
                    uri_copy.clone(),
                    topic_name,
                    topic_type,
                    md5sum,
                    data_tx,
                    node_handle,
                )
                .await
                {
                    debug!("subscriber connection to {uri_copy} ended: {e}");
                }
            });
            connections.insert(uri, task.into());
        }
    }
    debug!("subscription reconcile loop for {topic_name} exiting");
}

/// Calls `requestTopic` on the publisher's XMLRPC API, connects, exchanges
/// headers, then forwards every frame it reads onto `data_tx` until the
/// connection drops. No retry on failure; the next `publisherUpdate` will
/// re-attempt if the publisher is still registered.
async fn connect_and_stream(
    publisher_uri: String,
    topic_name: String,
    topic_type: String,
    md5sum: String,
    data_tx: broadcast::Sender<Vec<u8>>,
    node_handle: NodeServerHandle,
) -> Result<()> {
    let client = reqwest::Client::new();
    let protocols = Value::Array(vec![Value::Array(vec![Value::String(
        CHANNEL_PROBE_PARAM.to_owned(),
    )])]);
    let result = xmlrpc::call(
        &client,
        &publisher_uri,
        "requestTopic",
        &[
            node_handle.node_name().to_string().into(),
            topic_name.clone().into(),
            protocols,
        ],
    )
    .await?;
    let value = result.into_value()?;
    let (host, port) = parse_protocol_params(&value)?;

    let mut stream = TcpStream::connect((host.as_str(), port)).await?;
    let request_header = ConnectionHeader {
        caller_id: node_handle.node_name().to_string(),
        topic: Some(topic_name.clone()),
        topic_type: topic_type.clone(),
        md5sum: Some(md5sum.clone()),
        tcp_nodelay: false,
        ..Default::default()
    };
    tcpros::send_header(&mut stream, &request_header, false).await?;
    let response_header = tcpros::receive_header(&mut stream).await?;
    tcpros::check_type_and_md5sum(&topic_type, &md5sum, &response_header)?;

    info!("subscribed to {topic_name} via {publisher_uri}");
    loop {
        if node_handle.is_shutting_down() {
            break;
        }
        let frame = tcpros::read_frame(&mut stream).await?;
        // Dropping every local Subscriber<T> closes the broadcast channel;
        // a send error here just means nobody's listening anymore.
        let _ = data_tx.send(frame);
    }
    Ok(())
}

fn parse_protocol_params(value: &Value) -> Result<(String, u16)> {
    let items = value
        .as_array()
        .ok_or_else(|| Ros1Error::XmlRpc("requestTopic did not return an array".into()))?;
    let protocol = items
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Ros1Error::XmlRpc("requestTopic response missing protocol name".into()))?;
    if protocol != CHANNEL_PROBE_PARAM {
        return Err(Ros1Error::XmlRpc(format!(
            "unsupported transport protocol: {protocol}"
        )));
    }
    let host = items
        .get(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Ros1Error::XmlRpc("requestTopic response missing host".into()))?
        .to_owned();
    let port = items
        .get(2)
        .and_then(|v| v.as_i32())
        .ok_or_else(|| Ros1Error::XmlRpc("requestTopic response missing port".into()))?;
    Ok((host, port as u16))
}

/// Handle returned by `NodeHandle::subscribe::<T>()`.
pub struct Subscriber<T> {
    topic_name: String,
    receiver: broadcast::Receiver<Vec<u8>>,
    phantom: std::marker::PhantomData<T>,
}

impl<T: RosMessageType> Subscriber<T> {
    pub(crate) fn new(topic_name: String, receiver: broadcast::Receiver<Vec<u8>>) -> Self {
        Self {
            topic_name,
            receiver,
            phantom: std::marker::PhantomData,
        }
    }

    /// Waits for and deserializes the next message. Returns `None` once
    /// every publisher connection for this topic has gone away and the
    /// Subscription's broadcast channel has been dropped.
    pub async fn next(&mut self) -> Option<CommonResult<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => {
                    return Some(
                        serde_rosmsg::from_slice(&bytes)
                            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e.to_string())).into()),
                    )
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("subscriber for {} lagged, dropped {n} messages", self.topic_name);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl<T: RosMessageType> Subscribe<T> for Subscriber<T> {
    async fn next(&mut self) -> Option<CommonResult<T>> {
        Subscriber::next(self).await
    }
}
