//! Native ROS1 node implementation: XMLRPC Master/Slave APIs, the TCPROS
//! wire protocol, and an actor-model concurrency layer built on `tokio`.
//!
//! The entry point is [`NodeHandle::new`]; everything else (publishers,
//! subscribers, service clients/servers, parameter subscriptions) is
//! obtained through it.

mod error;
mod master_client;
mod names;
mod node;
mod node_handle;
mod param;
mod publisher;
mod service_server;
mod slave_server;
mod subscriber;
mod tcpros;
mod xmlrpc;

pub use error::Ros1Error;
pub use master_client::MasterClient;
pub use names::Name;
pub use node::NodeConfig;
pub use node_handle::NodeHandle;
pub use param::ParamSubscription;
pub use publisher::{Publisher, PublisherAny};
pub use service_server::ServiceClient;
pub use subscriber::Subscriber;
pub use xmlrpc::Value;

// Re-export the shared traits/types so downstream crates don't need a direct
// dependency on `roslibrust_common` just to name `RosMessageType`/`Result`.
pub use roslibrust_common::{Error, Result, RosMessageType, RosServiceType, ServiceFn};
