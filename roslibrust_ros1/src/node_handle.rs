//! The public, user-facing entry point: `NodeHandle::new` brings up a full
//! node (XMLRPC + TCPROS listeners, Master registration point) and hands
//! back advertise/subscribe/service methods.

use roslibrust_common::{RosMessageType, RosServiceType, ServiceFn};

use crate::error::Result;
use crate::master_client::MasterClient;
use crate::names::Name;
use crate::node::{Node, NodeConfig, NodeServerHandle, PublicationEntry, ServiceEntry, SubscriptionEntry};
use crate::param::ParamSubscription;
use crate::publisher::{Publication, Publisher, PublisherAny};
use crate::service_server::{Service, ServiceClient};
use crate::subscriber::{Subscriber, Subscription};
use crate::xmlrpc::Value;

/// A running ROS1 node. Cloning shares the same underlying actor; dropping
/// every clone does not by itself shut the node down -- call
/// [`NodeHandle::shutdown`] explicitly -- shutdown is driven, not implicit
/// in `Drop`, since in-flight sessions need the chance to drain.
#[derive(Clone)]
pub struct NodeHandle {
    inner: NodeServerHandle,
}

impl NodeHandle {
    /// Brings up a node named `name` (resolved against the root namespace;
    /// pass an already-global name like `/talker` to control placement)
    /// registered against `master_uri`.
    pub async fn new(master_uri: &str, name: &str) -> Result<Self> {
        Self::new_with_config(NodeConfig::new(master_uri, name)).await
    }

    pub async fn new_with_config(config: NodeConfig) -> Result<Self> {
        let inner = Node::spawn(config).await?;
        let bound_addr = crate::slave_server::spawn(inner.config().xmlrpc_bind_addr, inner.clone())
            .await
            .map_err(crate::error::Ros1Error::Io)?;
        let inner = inner.with_resolved_xmlrpc_port(bound_addr.port());
        Ok(Self { inner })
    }

    pub fn name(&self) -> &Name {
        self.inner.node_name()
    }

    pub fn master(&self) -> &MasterClient {
        self.inner.master()
    }

    /// Advertises `topic_name` as publishing messages of type `T`. `queue_size`
    /// bounds the internal publish queue.
    pub async fn advertise<T: RosMessageType>(
        &self,
        topic_name: &str,
        queue_size: usize,
        latching: bool,
    ) -> Result<Publisher<T>> {
        let topic = Name::resolve(topic_name, self.inner.node_name().as_str())?;
        let (publication, sender) = Publication::new(
            self.inner.node_name(),
            latching,
            topic.as_str(),
            queue_size,
            T::DEFINITION,
            T::MD5SUM,
            T::ROS_TYPE_NAME,
            self.inner.clone(),
        )
        .await;

        self.inner
            .add_publication(
                topic.to_string(),
                PublicationEntry {
                    publication,
                    topic_type: T::ROS_TYPE_NAME.to_owned(),
                    md5sum: T::MD5SUM.to_owned(),
                },
            )
            .await?;
        self.inner
            .master()
            .register_publisher(topic.as_str(), T::ROS_TYPE_NAME, self.inner.xmlrpc_uri())
            .await?;

        Ok(Publisher::new(topic.as_str(), sender))
    }

    /// Like [`advertise`](Self::advertise) but for publishing pre-serialized
    /// bytes without a compile-time message type.
    pub async fn advertise_any(
        &self,
        topic_name: &str,
        topic_type: &str,
        md5sum: &str,
        msg_definition: &str,
        queue_size: usize,
        latching: bool,
    ) -> Result<PublisherAny> {
        let topic = Name::resolve(topic_name, self.inner.node_name().as_str())?;
        let (publication, sender) = Publication::new(
            self.inner.node_name(),
            latching,
            topic.as_str(),
            queue_size,
            msg_definition,
            md5sum,
            topic_type,
            self.inner.clone(),
        )
        .await;
        self.inner
            .add_publication(
                topic.to_string(),
                PublicationEntry {
                    publication,
                    topic_type: topic_type.to_owned(),
                    md5sum: md5sum.to_owned(),
                },
            )
            .await?;
        self.inner
            .master()
            .register_publisher(topic.as_str(), topic_type, self.inner.xmlrpc_uri())
            .await?;
        Ok(PublisherAny::new(topic.as_str(), sender))
    }

    /// Subscribes to `topic_name`, registering with the Master and
    /// connecting to every publisher it reports.
    pub async fn subscribe<T: RosMessageType>(
        &self,
        topic_name: &str,
        queue_size: usize,
    ) -> Result<Subscriber<T>> {
        let topic = Name::resolve(topic_name, self.inner.node_name().as_str())?;

        if let Some((existing_type, _)) = self.inner.lookup_subscription_type(topic.as_str()).await {
            if existing_type != T::ROS_TYPE_NAME {
                return Err(crate::error::Ros1Error::HeaderMismatch(format!(
                    "topic {topic} is already subscribed as {existing_type}, not {}",
                    T::ROS_TYPE_NAME
                )));
            }
            // A second local subscriber for an already-subscribed topic
            // shares the existing TCPROS connections rather than opening a
            // duplicate set (ROS allows any number of local Subscriber
            // handles per topic, but only one registerSubscriber call).
            if let Some(receiver) = self.inner.subscribe_existing(topic.as_str()).await {
                return Ok(Subscriber::new(topic.to_string(), receiver));
            }
        }

        let (subscription, receiver) = Subscription::new(
            topic.to_string(),
            T::ROS_TYPE_NAME.to_owned(),
            T::MD5SUM.to_owned(),
            queue_size,
            self.inner.clone(),
        );

        self.inner
            .add_subscription(
                topic.to_string(),
                SubscriptionEntry {
                    subscription,
                    topic_type: T::ROS_TYPE_NAME.to_owned(),
                    md5sum: T::MD5SUM.to_owned(),
                },
            )
            .await?;

        let publishers = self
            .inner
            .master()
            .register_subscriber(topic.as_str(), T::ROS_TYPE_NAME, self.inner.xmlrpc_uri())
            .await?;
        self.inner
            .reconcile_publishers(topic.to_string(), publishers)
            .await;

        Ok(Subscriber::new(topic.to_string(), receiver))
    }

    /// Advertises a service handler. `handler` runs on whichever connection
    /// task receives a call; persistent clients reuse the same task across
    /// multiple calls.
    pub async fn advertise_service<T: RosServiceType>(
        &self,
        service_name: &str,
        handler: impl ServiceFn<T>,
    ) -> Result<()> {
        let name = Name::resolve(service_name, self.inner.node_name().as_str())?;
        let service = Service::new::<T>(handler);
        self.inner
            .add_service(
                name.to_string(),
                ServiceEntry {
                    service,
                    service_type: T::ROS_SERVICE_NAME.to_owned(),
                    md5sum: T::MD5SUM.to_owned(),
                },
            )
            .await?;
        let service_api = format!("rosrpc://{}:{}", self.inner.host_addr(), self.inner.tcpros_port());
        self.inner
            .master()
            .register_service(name.as_str(), &service_api, self.inner.xmlrpc_uri())
            .await?;
        Ok(())
    }

    /// Builds a client for calling a service registered elsewhere on the
    /// graph. `persistent` keeps the TCP connection open across calls.
    pub fn service_client<T: RosServiceType>(
        &self,
        service_name: &str,
        persistent: bool,
    ) -> Result<ServiceClient<T>> {
        let name = Name::resolve(service_name, self.inner.node_name().as_str())?;
        Ok(ServiceClient::new(
            name.to_string(),
            self.inner.node_name().to_string(),
            self.inner.master().clone(),
            persistent,
        ))
    }

    pub async fn get_param(&self, key: &str) -> Result<Value> {
        Ok(self.inner.master().get_param(key).await?)
    }

    pub async fn set_param(&self, key: &str, value: Value) -> Result<()> {
        Ok(self.inner.master().set_param(key, value).await?)
    }

    pub async fn delete_param(&self, key: &str) -> Result<()> {
        Ok(self.inner.master().delete_param(key).await?)
    }

    pub async fn has_param(&self, key: &str) -> Result<bool> {
        Ok(self.inner.master().has_param(key).await?)
    }

    pub async fn subscribe_param(&self, key: &str) -> Result<ParamSubscription> {
        ParamSubscription::new(key.to_owned(), self.inner.clone()).await
    }

    /// Drives the full shutdown sequence.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}
