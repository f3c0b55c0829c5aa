//! A live, push-updated view of a single Master parameter.
//!
//! The Master delivers updates to a subscribed key via a `paramUpdate` call
//! back to our own Slave XMLRPC API; the Slave server forwards that into the
//! Node actor, which publishes it on the matching `watch::Sender` registered
//! here.

use tokio::sync::watch;

use crate::error::Result;
use crate::node::NodeServerHandle;
use crate::xmlrpc::Value;

/// A live view of a parameter's value, updated whenever the Master reports
/// a change via `paramUpdate`.
pub struct ParamSubscription {
    key: String,
    node_handle: NodeServerHandle,
    rx: watch::Receiver<Value>,
}

impl ParamSubscription {
    pub(crate) async fn new(key: String, node_handle: NodeServerHandle) -> Result<Self> {
        let initial = node_handle
            .master()
            .subscribe_param(node_handle.xmlrpc_uri(), &key)
            .await?;
        let (tx, rx) = watch::channel(initial);
        node_handle
            .set_param_subscription(key.clone(), tx)
            .await?;
        Ok(Self { key, node_handle, rx })
    }

    /// Returns the most recently observed value without waiting.
    pub fn get(&self) -> Value {
        self.rx.borrow().clone()
    }

    /// Waits until the Master reports a new value for this key.
    pub async fn changed(&mut self) -> Result<Value> {
        self.rx
            .changed()
            .await
            .map_err(|_| crate::error::Ros1Error::NotFound("param subscription channel closed".into()))?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

impl Drop for ParamSubscription {
    fn drop(&mut self) {
        let node_handle = self.node_handle.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            node_handle.remove_param_subscription(key.clone()).await;
            let xmlrpc_uri = node_handle.xmlrpc_uri().to_owned();
            let _ = node_handle.master().unsubscribe_param(&xmlrpc_uri, &key).await;
        });
    }
}
