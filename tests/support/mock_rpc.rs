use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use alloy_primitives::{Address, B256, U64};
use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::helpers::tx_hash;

/// Logs emitted by one transaction: `(emitter, topic0)` pairs.
pub type TxLogs = Vec<(Address, B256)>;

#[derive(Clone)]
pub struct MockChain {
    inner: Arc<RwLock<MockChainInner>>,
    max_log_range: Arc<AtomicU64>,
    failing_log_queries: Arc<AtomicUsize>,
    log_calls: Arc<AtomicUsize>,
    block_calls: Arc<AtomicUsize>,
    receipt_calls: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MockChainInner {
    logs: Vec<Value>,
    blocks: BTreeMap<u64, Vec<B256>>,
    receipts: HashMap<B256, Value>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockChainInner::default())),
            max_log_range: Arc::new(AtomicU64::new(u64::MAX)),
            failing_log_queries: Arc::new(AtomicUsize::new(0)),
            log_calls: Arc::new(AtomicUsize::new(0)),
            block_calls: Arc::new(AtomicUsize::new(0)),
            receipt_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Adds `number` whose transaction `i` emits `transactions[i]`.
    pub fn add_block(&self, number: u64, transactions: Vec<TxLogs>) {
        let mut inner = self.inner.write().expect("mock chain poisoned");
        let mut hashes = Vec::with_capacity(transactions.len());
        let mut log_index = 0u64;

        for (index, emitted) in transactions.into_iter().enumerate() {
            let index = index as u64;
            let hash = tx_hash(number, index);
            hashes.push(hash);

            let logs: Vec<Value> = emitted
                .into_iter()
                .map(|(address, topic)| {
                    let log = json!({
                        "address": address,
                        "topics": [topic],
                        "data": "0x",
                        "blockNumber": U64::from(number),
                        "transactionHash": hash,
                        "transactionIndex": U64::from(index),
                        "logIndex": U64::from(log_index),
                        "removed": false,
                    });
                    log_index += 1;
                    log
                })
                .collect();

            inner.logs.extend(logs.iter().cloned());
            inner.receipts.insert(
                hash,
                json!({
                    "transactionHash": hash,
                    "transactionIndex": U64::from(index),
                    "blockNumber": U64::from(number),
                    "logs": logs,
                    "gasUsed": U64::from(50_000 + index),
                    "effectiveGasPrice": U64::from(2_000_000_000u64),
                    "status": "0x1",
                }),
            );
        }

        inner.blocks.insert(number, hashes);
    }

    pub fn best_height(&self) -> u64 {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    /// Rejects `eth_getLogs` spans wider than `blocks`, as hosted providers do.
    pub fn set_max_log_range(&self, blocks: u64) {
        self.max_log_range.store(blocks, Ordering::SeqCst);
    }

    /// The next `count` `eth_getLogs` calls answer with a transient error.
    pub fn fail_next_log_queries(&self, count: usize) {
        self.failing_log_queries.store(count, Ordering::SeqCst);
    }

    pub fn drop_receipt(&self, hash: B256) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .receipts
            .remove(&hash);
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_log_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    fn get_logs(&self, filter: &Value) -> Result<Value, (i64, String)> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err((-32000, "upstream temporarily unavailable".into()));
        }

        let bad_bound = |field: &str| (-32602i64, format!("invalid {field}"));
        let from = quantity(filter.get("fromBlock")).ok_or_else(|| bad_bound("fromBlock"))?;
        let to = quantity(filter.get("toBlock")).ok_or_else(|| bad_bound("toBlock"))?;
        let max_range = self.max_log_range.load(Ordering::SeqCst);
        if to.saturating_sub(from).saturating_add(1) > max_range {
            return Err((
                -32005,
                format!("block range too large, query returned more than {max_range} results"),
            ));
        }

        let addresses: Vec<Value> = match filter.get("address") {
            Some(Value::Array(values)) => values.clone(),
            Some(Value::String(value)) => vec![Value::String(value.clone())],
            _ => Vec::new(),
        };
        let topic0: Vec<Value> = match filter.get("topics").and_then(|t| t.get(0)) {
            Some(Value::Array(values)) => values.clone(),
            Some(Value::String(value)) => vec![Value::String(value.clone())],
            _ => Vec::new(),
        };

        let inner = self.inner.read().expect("mock chain poisoned");
        let matches: Vec<Value> = inner
            .logs
            .iter()
            .filter(|log| {
                let block = quantity(log.get("blockNumber")).unwrap_or_default();
                (from..=to).contains(&block)
                    && (addresses.is_empty()
                        || addresses
                            .iter()
                            .any(|address| same_hex(address, &log["address"])))
                    && (topic0.is_empty()
                        || topic0.iter().any(|topic| same_hex(topic, &log["topics"][0])))
            })
            .cloned()
            .collect();
        Ok(Value::Array(matches))
    }

    fn get_block(&self, params: &Value) -> Value {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let Some(number) = quantity(params.get(0)) else {
            return Value::Null;
        };
        let inner = self.inner.read().expect("mock chain poisoned");
        match inner.blocks.get(&number) {
            Some(hashes) => json!({
                "number": U64::from(number),
                "transactions": hashes,
            }),
            None => Value::Null,
        }
    }

    fn get_receipt(&self, params: &Value) -> Value {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let hash = params
            .get(0)
            .cloned()
            .and_then(|value| serde_json::from_value::<B256>(value).ok());
        let inner = self.inner.read().expect("mock chain poisoned");
        hash.and_then(|hash| inner.receipts.get(&hash).cloned())
            .unwrap_or(Value::Null)
    }
}

fn quantity(value: Option<&Value>) -> Option<u64> {
    let parsed: U64 = serde_json::from_value(value?.clone()).ok()?;
    Some(parsed.to())
}

fn same_hex(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_str(), rhs.as_str()) {
        (Some(lhs), Some(rhs)) => lhs.eq_ignore_ascii_case(rhs),
        _ => false,
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
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

async fn serve_request(chain: MockChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "only POST is served".into()));
    }

    let payload = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes),
        Err(err) => return Ok(plain(StatusCode::BAD_REQUEST, format!("unreadable body: {err}"))),
    };
    let reply = match payload {
        Ok(Value::Array(calls)) => Value::Array(
            calls
                .into_iter()
                .map(|call| handle_call(&chain, call))
                .collect(),
        ),
        Ok(call) => handle_call(&chain, call),
        Err(err) => return Ok(plain(StatusCode::BAD_REQUEST, format!("invalid JSON: {err}"))),
    };

    let mut response = Response::new(Body::from(reply.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn plain(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn handle_call(chain: &MockChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    match method.as_str() {
        "eth_blockNumber" => success(id, json!(U64::from(chain.best_height()))),
        "eth_getLogs" => match params.get(0).map(|filter| chain.get_logs(filter)) {
            Some(Ok(logs)) => success(id, logs),
            Some(Err((code, message))) => error(id, code, message),
            None => error(id, -32602, "missing filter object"),
        },
        "eth_getBlockByNumber" => success(id, chain.get_block(&params)),
        "eth_getTransactionReceipt" => success(id, chain.get_receipt(&params)),
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
