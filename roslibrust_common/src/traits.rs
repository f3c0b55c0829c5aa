//! Generic pubsub / service-call traits.
//!
//! These describe the shape any roslibrust backend (native ROS1, rosbridge,
//! ...) exposes for publishing, subscribing, and calling services, so code
//! written against them can be backend-agnostic. `roslibrust_ros1`'s
//! `Publisher`, `Subscriber`, and `ServiceClient` types implement these.

use crate::{Result, RosMessageType, RosServiceType};

/// A handle that can publish messages of type `T` onto some topic.
pub trait Publish<T: RosMessageType>: Send + Sync {
    /// Queues `data` to be sent. Returns once the data has been handed off,
    /// not once it has actually reached any subscriber.
    fn publish(&self, data: &T) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// A handle that yields messages of type `T` received on some topic.
pub trait Subscribe<T: RosMessageType>: Send {
    /// Waits for and returns the next message, or `None` if the underlying
    /// connection has been permanently closed.
    fn next(&mut self) -> impl std::future::Future<Output = Option<Result<T>>> + Send;
}

/// A handle that can invoke a remote service of type `T`.
pub trait CallService<T: RosServiceType>: Send + Sync {
    fn call(&self, request: &T::Request) -> impl std::future::Future<Output = Result<T::Response>> + Send;
}
