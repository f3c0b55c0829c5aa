//! Outbound XML-RPC calls to the ROS Master.
//!
//! Each call follows the pattern *build params → POST → decode the
//! `(code, status, value)` triple*; no call retries internally, the Node
//! actor decides whether to re-attempt a failed registration.

use crate::error::{Ros1Error, Result};
use crate::xmlrpc::{self, Value};

/// A thin client for the handful of Master API calls this crate makes.
#[derive(Clone)]
pub struct MasterClient {
    master_uri: String,
    caller_id: String,
    client: reqwest::Client,
}

impl MasterClient {
    pub fn new(master_uri: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            master_uri: master_uri.into(),
            caller_id: caller_id.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<xmlrpc::RpcResult> {
        xmlrpc::call(&self.client, &self.master_uri, method, params).await
    }

    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    /// Registers a publisher, returning the list of current subscriber URIs
    /// (publishers ignore this).
    pub async fn register_publisher(
        &self,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let result = self
            .call(
                "registerPublisher",
                &[
                    self.caller_id.as_str().into(),
                    topic.into(),
                    topic_type.into(),
                    caller_api.into(),
                ],
            )
            .await?;
        let value = result.into_value()?;
        Ok(string_array(&value))
    }

    pub async fn unregister_publisher(&self, topic: &str, caller_api: &str) -> Result<()> {
        self.call(
            "unregisterPublisher",
            &[self.caller_id.as_str().into(), topic.into(), caller_api.into()],
        )
        .await?
        .into_value()?;
        Ok(())
    }

    /// Registers a subscriber, returning the publisher URI list, which
    /// triggers outbound TCPROS connects.
    pub async fn register_subscriber(
        &self,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let result = self
            .call(
                "registerSubscriber",
                &[
                    self.caller_id.as_str().into(),
                    topic.into(),
                    topic_type.into(),
                    caller_api.into(),
                ],
            )
            .await?;
        Ok(string_array(&result.into_value()?))
    }

    pub async fn unregister_subscriber(&self, topic: &str, caller_api: &str) -> Result<()> {
        self.call(
            "unregisterSubscriber",
            &[self.caller_id.as_str().into(), topic.into(), caller_api.into()],
        )
        .await?
        .into_value()?;
        Ok(())
    }

    pub async fn register_service(
        &self,
        service: &str,
        service_api: &str,
        caller_api: &str,
    ) -> Result<()> {
        self.call(
            "registerService",
            &[
                self.caller_id.as_str().into(),
                service.into(),
                service_api.into(),
                caller_api.into(),
            ],
        )
        .await?
        .into_value()?;
        Ok(())
    }

    pub async fn unregister_service(&self, service: &str, service_api: &str) -> Result<()> {
        self.call(
            "unregisterService",
            &[self.caller_id.as_str().into(), service.into(), service_api.into()],
        )
        .await?
        .into_value()?;
        Ok(())
    }

    pub async fn lookup_service(&self, service: &str) -> Result<String> {
        let value = self
            .call("lookupService", &[self.caller_id.as_str().into(), service.into()])
            .await?
            .into_value()?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Ros1Error::XmlRpc("lookupService did not return a URI string".into()))
    }

    pub async fn get_param(&self, key: &str) -> Result<Value> {
        self.call("getParam", &[self.caller_id.as_str().into(), key.into()])
            .await?
            .into_value()
    }

    pub async fn set_param(&self, key: &str, value: Value) -> Result<()> {
        self.call("setParam", &[self.caller_id.as_str().into(), key.into(), value])
            .await?
            .into_value()?;
        Ok(())
    }

    pub async fn delete_param(&self, key: &str) -> Result<()> {
        self.call("deleteParam", &[self.caller_id.as_str().into(), key.into()])
            .await?
            .into_value()?;
        Ok(())
    }

    pub async fn has_param(&self, key: &str) -> Result<bool> {
        let value = self
            .call("hasParam", &[self.caller_id.as_str().into(), key.into()])
            .await?
            .into_value()?;
        Ok(matches!(value, Value::Bool(true)))
    }

    pub async fn subscribe_param(&self, caller_api: &str, key: &str) -> Result<Value> {
        self.call(
            "subscribeParam",
            &[self.caller_id.as_str().into(), caller_api.into(), key.into()],
        )
        .await?
        .into_value()
    }

    pub async fn unsubscribe_param(&self, caller_api: &str, key: &str) -> Result<()> {
        self.call(
            "unsubscribeParam",
            &[self.caller_id.as_str().into(), caller_api.into(), key.into()],
        )
        .await?
        .into_value()?;
        Ok(())
    }

    /// Used as the self-ping that wakes up our own blocked XMLRPC listener
    /// during shutdown, as well as generically for liveness checks of remote
    /// nodes.
    pub async fn get_pid(&self, uri: &str) -> Result<i32> {
        let result = xmlrpc::call(&self.client, uri, "getPid", &[self.caller_id.as_str().into()])
            .await?
            .into_value()?;
        result
            .as_i32()
            .ok_or_else(|| Ros1Error::XmlRpc("getPid did not return an integer".into()))
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
