use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use pdfstream::stream::client::{EXPIRED_POSITION_CODE, SHARD_NOT_FOUND_CODE};
use pdfstream::{ReadPosition, StreamError};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::shard::MockShard;

/// HTTP JSON-RPC gateway serving `getrecords` for one shard.
pub struct MockGateway {
    url: String,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone)]
struct GatewayState {
    stream: String,
    shard_id: String,
    shard: MockShard,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockGateway {
    pub async fn start(stream: &str, shard_id: &str, shard: MockShard) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock gateway listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock gateway address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock gateway listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock gateway listener non-blocking")?;

        let authorizations = Arc::new(Mutex::new(Vec::new()));
        let state = GatewayState {
            stream: stream.to_owned(),
            shard_id: shard_id.to_owned(),
            shard,
            authorizations: authorizations.clone(),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_service = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(state.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock gateway server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock gateway stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            authorizations,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Authorization header of every request received so far.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations
            .lock()
            .expect("authorizations poisoned")
            .clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    state: GatewayState,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }

    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    state
        .authorizations
        .lock()
        .expect("authorizations poisoned")
        .push(authorization);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(plain(
                StatusCode::BAD_REQUEST,
                format!("failed to read body: {err}"),
            ))
        }
    };
    let call: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return Ok(plain(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON payload: {err}"),
            ))
        }
    };

    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call.get("method").and_then(Value::as_str).unwrap_or_default();
    if method != "getrecords" {
        return Ok(rpc(error(id, -32601, format!("unknown method {method}"))));
    }

    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let stream = params.first().and_then(Value::as_str).unwrap_or_default();
    let shard = params.get(1).and_then(Value::as_str).unwrap_or_default();
    if stream != state.stream || shard != state.shard_id {
        return Ok(rpc(error(
            id,
            SHARD_NOT_FOUND_CODE,
            format!("shard {stream}/{shard} not found"),
        )));
    }

    let position: ReadPosition = match params
        .get(2)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(Some(position)) => position,
        _ => return Ok(rpc(error(id, -32602, "invalid read position"))),
    };
    let limit = params.get(3).and_then(Value::as_u64).unwrap_or(100) as usize;

    match state.shard.read(position, limit) {
        Ok(batch) => {
            let records: Vec<Value> = batch
                .records
                .iter()
                .map(|record| {
                    json!({
                        "sequence": record.sequence,
                        "partition_key": record.partition_key,
                        "data": BASE64_STANDARD.encode(&record.data),
                        "arrival_ms": record.arrival_ms,
                    })
                })
                .collect();
            Ok(rpc(success(
                id,
                json!({
                    "records": records,
                    "trim_horizon": batch.trim_horizon,
                    "latest": batch.latest,
                }),
            )))
        }
        Err(StreamError::ExpiredPosition { message }) => {
            Ok(rpc(error(id, EXPIRED_POSITION_CODE, message)))
        }
        Err(StreamError::ShardNotFound { shard }) => Ok(rpc(error(
            id,
            SHARD_NOT_FOUND_CODE,
            format!("shard {shard} not found"),
        ))),
        Err(err) => Ok(plain(StatusCode::SERVICE_UNAVAILABLE, err.to_string())),
    }
}

fn plain(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response
}

fn rpc(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
