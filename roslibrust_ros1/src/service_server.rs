//! Locally-provided services: `NodeHandle::advertise_service` and the
//! peer-initiated service session the Node's shared TCPROS listener
//! dispatches into.
//!
//! A service's handler is type-erased into a raw-bytes-in/raw-bytes-out
//! closure at registration time (mirroring the `ShapeShifter`-style
//! generic-over-wire-bytes pattern `roslibrust_common::ShapeShifter` uses),
//! so the Node registry can hold services of different `RosServiceType`s in
//! one `HashMap` without a trait object per message type.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use log::*;
use roslibrust_common::{traits::CallService, RosServiceType, ServiceFn};
use tokio::net::TcpStream;

use crate::error::{Ros1Error, Result};
use crate::master_client::MasterClient;
use crate::node::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw-bytes service handler: deserialize request, run the user's handler,
/// serialize the response or surface its error string. Cloneable since the
/// Node registry hands a clone to every connection task.
pub(crate) type ServiceHandlerFn =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, std::result::Result<Vec<u8>, String>> + Send + Sync>;

pub(crate) struct Service {
    pub handler: ServiceHandlerFn,
}

impl Service {
    pub(crate) fn new<T: RosServiceType>(handler: impl ServiceFn<T>) -> Self {
        let handler = Arc::new(handler);
        let boxed: ServiceHandlerFn = Arc::new(move |bytes: Vec<u8>| {
            let handler = handler.clone();
            Box::pin(async move {
                let request: T::Request =
                    serde_rosmsg::from_slice(&bytes).map_err(|e| e.to_string())?;
                match (handler)(request) {
                    Ok(response) => serde_rosmsg::to_vec(&response).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            })
        });
        Self { handler: boxed }
    }
}

/// Handles one peer-initiated service call connection once the Node's
/// shared TCPROS listener has read the caller's header and determined it
/// names a `service` rather than a `topic`.
pub(crate) async fn handle_service_session(
    mut stream: TcpStream,
    service_name: String,
    header: ConnectionHeader,
    node_handle: NodeServerHandle,
) -> Result<()> {
    let Some((service_type, md5sum, handler)) = node_handle.lookup_service(&service_name).await
    else {
        return Err(Ros1Error::NotFound(format!(
            "{service_name} is not a service we provide"
        )));
    };
    tcpros::check_type_and_md5sum(&service_type, &md5sum, &header)?;

    let response_header = ConnectionHeader {
        caller_id: node_handle.node_name().to_string(),
        service: Some(service_name.clone()),
        request_type: Some(format!("{service_type}Request")),
        response_type: Some(format!("{service_type}Response")),
        topic_type: service_type,
        md5sum: Some(md5sum),
        ..Default::default()
    };
    tcpros::send_header(&mut stream, &response_header, true).await?;

    if header.probe {
        return Ok(());
    }

    loop {
        if node_handle.is_shutting_down() {
            break;
        }
        let request_bytes = match tcpros::read_frame(&mut stream).await {
            Ok(bytes) => bytes,
            Err(_) => break, // peer closed the connection
        };
        match (handler)(request_bytes).await {
            Ok(response_bytes) => tcpros::write_service_success(&mut stream, &response_bytes).await?,
            Err(errstr) => tcpros::write_service_failure(&mut stream, &errstr).await?,
        }
        if !header.persistent {
            break;
        }
    }
    Ok(())
}

/// Handle returned by `NodeHandle::service_client::<T>()`.
pub struct ServiceClient<T: RosServiceType> {
    service_name: String,
    node_name: String,
    master: MasterClient,
    persistent: bool,
    conn: tokio::sync::Mutex<Option<TcpStream>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: RosServiceType> ServiceClient<T> {
    pub(crate) fn new(
        service_name: String,
        node_name: String,
        master: MasterClient,
        persistent: bool,
    ) -> Self {
        Self {
            service_name,
            node_name,
            master,
            persistent,
            conn: tokio::sync::Mutex::new(None),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Performs a locally-initiated service call: look up the provider via
    /// the Master if we don't already hold a persistent connection, connect,
    /// handshake, send the request, and read back one response turn.
    pub async fn call(&self, request: &T::Request) -> roslibrust_common::Result<T::Response> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().expect("just ensured connection exists");

        let body = serde_rosmsg::to_vec(request)
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e.to_string())))?;
        if let Err(e) = tcpros::write_frame(stream, &body).await {
            *guard = None;
            return Err(e.into());
        }
        let response = match tcpros::read_service_response(stream).await {
            Ok(r) => r,
            Err(e) => {
                *guard = None;
                return Err(e.into());
            }
        };
        if !self.persistent {
            *guard = None;
        }
        match response {
            Ok(bytes) => serde_rosmsg::from_slice(&bytes)
                .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e.to_string())).into()),
            Err(errstr) => Err(Ros1Error::PeerError(errstr).into()),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let uri = self.master.lookup_service(&self.service_name).await?;
        let (host, port) = parse_rosrpc_uri(&uri)?;
        let mut stream = TcpStream::connect((host.as_str(), port)).await?;
        let header = ConnectionHeader {
            caller_id: self.node_name.clone(),
            service: Some(self.service_name.clone()),
            md5sum: Some(T::MD5SUM.to_owned()),
            persistent: self.persistent,
            ..Default::default()
        };
        tcpros::send_header(&mut stream, &header, false).await?;
        let response_header = tcpros::receive_header(&mut stream).await?;
        if let Some(err) = response_header.error {
            return Err(Ros1Error::PeerError(err));
        }
        debug!("service client connected to {} at {}", self.service_name, uri);
        Ok(stream)
    }
}

impl<T: RosServiceType> CallService<T> for ServiceClient<T> {
    async fn call(&self, request: &T::Request) -> roslibrust_common::Result<T::Response> {
        ServiceClient::call(self, request).await
    }
}

fn parse_rosrpc_uri(uri: &str) -> Result<(String, u16)> {
    let rest = uri
        .strip_prefix("rosrpc://")
        .ok_or_else(|| Ros1Error::XmlRpc(format!("lookupService returned non-rosrpc URI: {uri}")))?;
    let (host, port) = rest
        .split_once(':')
        .ok_or_else(|| Ros1Error::XmlRpc(format!("malformed rosrpc URI: {uri}")))?;
    let port: u16 = port
        .trim_end_matches('/')
        .parse()
        .map_err(|_| Ros1Error::XmlRpc(format!("malformed port in rosrpc URI: {uri}")))?;
    Ok((host.to_owned(), port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_rosrpc_uri() {
        let (host, port) = parse_rosrpc_uri("rosrpc://robot:12345/").unwrap();
        assert_eq!(host, "robot");
        assert_eq!(port, 12345);
    }

    #[test]
    fn rejects_non_rosrpc_uri() {
        assert!(parse_rosrpc_uri("http://robot:12345/").is_err());
    }
}
