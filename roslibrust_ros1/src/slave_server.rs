//! The Slave XMLRPC server: the HTTP endpoint other nodes and the Master
//! call into.
//!
//! Built on `hyper`; request bodies are decoded with `xmlrpc::decode_call`
//! and dispatched by method name, each handler built directly against
//! `NodeServerHandle` so there's no separate "service" struct threading
//! state through hyper's trait objects.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use log::*;
use tokio::sync::Semaphore;

use crate::node::NodeServerHandle;
use crate::xmlrpc::{self, RpcResult, Value};

/// Binds and spawns the Slave XMLRPC server. Returns the address it bound
/// to, so the caller can fold the real port into the node's advertised
/// XMLRPC URI (we bind to port 0 by default).
pub(crate) async fn spawn(
    bind_addr: SocketAddr,
    node_handle: NodeServerHandle,
) -> std::io::Result<SocketAddr> {
    let pool = Arc::new(Semaphore::new(node_handle.config().xmlrpc_pool_size));
    let node_handle = Arc::new(node_handle);

    let make_svc = make_service_fn(move |_conn| {
        let node_handle = node_handle.clone();
        let pool = pool.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let node_handle = node_handle.clone();
                let pool = pool.clone();
                async move {
                    let _permit = pool.acquire_owned().await.ok();
                    Ok::<_, Infallible>(handle_request(req, node_handle).await)
                }
            }))
        }
    });

    let server = Server::try_bind(&bind_addr).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, e.to_string())
    })?;
    let server = server.serve(make_svc);
    let local_addr = server.local_addr();

    // No graceful-shutdown future is wired in here: the self-ping in
    // `NodeServerHandle::shutdown` (spec S6) is answered by this same
    // server, and the task is simply dropped along with everything else
    // once the Node actor's `Shutdown` command clears its registries.
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("slave xmlrpc server exited with error: {e}");
        }
    });

    Ok(local_addr)
}

async fn handle_request(req: Request<Body>, node_handle: Arc<NodeServerHandle>) -> Response<Body> {
    let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => return text_response(500, format!("failed to read request body: {e}")),
    };
    let body = match String::from_utf8(body_bytes.to_vec()) {
        Ok(s) => s,
        Err(_) => return text_response(400, "request body was not valid utf8".into()),
    };

    let (method, params) = match xmlrpc::decode_call(&body) {
        Ok(parsed) => parsed,
        Err(e) => return text_response(400, format!("failed to parse xmlrpc call: {e}")),
    };

    let result = dispatch(&method, &params, &node_handle).await;
    match xmlrpc::encode_response(&result) {
        Ok(xml) => Response::new(Body::from(xml)),
        Err(e) => text_response(500, format!("failed to encode xmlrpc response: {e}")),
    }
}

fn text_response(status: u16, message: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message))
        .unwrap_or_else(|_| Response::new(Body::from(Bytes::new())))
}

/// The Slave API method dispatch table. Unknown methods fault with code -1,
/// matching the Master/Slave XMLRPC convention.
async fn dispatch(method: &str, params: &[Value], node_handle: &NodeServerHandle) -> RpcResult {
    match method {
        "getBusStats" => RpcResult::ok("bus stats", Value::Array(vec![
            Value::Array(vec![]),
            Value::Array(vec![]),
            Value::Array(vec![]),
        ])),
        "getBusInfo" => RpcResult::ok("bus info", Value::Array(vec![])),
        "getMasterUri" => RpcResult::ok("master uri", Value::String(node_handle.master().master_uri().to_owned())),
        "getPid" => RpcResult::ok("pid", Value::Int(std::process::id() as i32)),
        "shutdown" => {
            let reason = params.get(1).and_then(|v| v.as_str()).unwrap_or("");
            info!("received shutdown request: {reason}");
            let node_handle = node_handle.clone();
            tokio::spawn(async move {
                let _ = node_handle.shutdown().await;
            });
            RpcResult::ok("shutting down", Value::Int(0))
        }
        "getSubscriptions" => {
            let subs = node_handle.list_subscriptions().await;
            RpcResult::ok(
                "subscriptions",
                Value::Array(
                    subs.into_iter()
                        .map(|(topic, ty)| Value::Array(vec![Value::String(topic), Value::String(ty)]))
                        .collect(),
                ),
            )
        }
        "getPublications" => {
            let pubs = node_handle.list_publications().await;
            RpcResult::ok(
                "publications",
                Value::Array(
                    pubs.into_iter()
                        .map(|(topic, ty)| Value::Array(vec![Value::String(topic), Value::String(ty)]))
                        .collect(),
                ),
            )
        }
        "paramUpdate" => {
            let Some(key) = params.get(1).and_then(|v| v.as_str()) else {
                return RpcResult::error("paramUpdate missing key");
            };
            let value = params.get(2).cloned().unwrap_or(Value::Int(0));
            node_handle.param_update(key.to_owned(), value).await;
            RpcResult::ok("", Value::Int(1))
        }
        "publisherUpdate" => {
            let Some(topic) = params.get(1).and_then(|v| v.as_str()) else {
                return RpcResult::error("publisherUpdate missing topic");
            };
            let publishers = params
                .get(2)
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
                .unwrap_or_default();
            node_handle
                .reconcile_publishers(topic.to_owned(), publishers)
                .await;
            RpcResult::ok("", Value::Int(1))
        }
        "requestTopic" => {
            let Some(topic) = params.get(1).and_then(|v| v.as_str()) else {
                return RpcResult::error("requestTopic missing topic");
            };
            match node_handle.request_topic(topic).await {
                Some(_) => RpcResult::ok(
                    "",
                    Value::Array(vec![
                        Value::String("TCPROS".into()),
                        Value::String(node_handle.host_addr().to_string()),
                        Value::Int(node_handle.tcpros_port() as i32),
                    ]),
                ),
                None => RpcResult::failure(format!("not a publisher of {topic}")),
            }
        }
        other => RpcResult::error(format!("unknown method: {other}")),
    }
}
