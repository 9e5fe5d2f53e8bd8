//! Upstream node adapter.
//!
//! The tracker consumes two things from the node it watches: the current
//! account nonce of a sender (the unstuck probe) and the full mempool content
//! (the polling snapshot). Both are expressed as traits so the pools stay
//! testable without a node; `HttpRpc` is the JSON-RPC 2.0 implementation used
//! by the binary.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::txpool::{Address, MemPoolTx, MempoolSnapshot, PoolContent, TxHash};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed node response: {0}")]
    InvalidResponse(String),
}

/// Source of current account nonces, consumed by the unstuck probe.
#[async_trait]
pub trait NonceSource: Send + Sync + 'static {
    async fn account_nonce(&self, address: Address) -> Result<u64, RpcError>;
}

/// Source of full mempool snapshots, consumed by the polling driver.
#[async_trait]
pub trait MempoolSource: Send + Sync + 'static {
    async fn mempool_content(&self) -> Result<MempoolSnapshot, RpcError>;
}

/// JSON-RPC 2.0 client over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRpc {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRpc {
    /// The request timeout is enforced here; the pools carry none of their
    /// own.
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client, endpoint })
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        #[derive(Serialize)]
        struct Request<'a, P> {
            jsonrpc: &'static str,
            id: u32,
            method: &'a str,
            params: P,
        }

        #[derive(Deserialize)]
        struct ErrorObject {
            code: i64,
            message: String,
        }

        #[derive(Deserialize)]
        struct Response<R> {
            result: Option<R>,
            error: Option<ErrorObject>,
        }

        let request = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: Response<R> = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{method}: missing result")))
    }
}

#[async_trait]
impl NonceSource for HttpRpc {
    async fn account_nonce(&self, address: Address) -> Result<u64, RpcError> {
        let count: String = self
            .call("eth_getTransactionCount", (address.to_string(), "latest"))
            .await?;
        parse_quantity_u64(&count)
    }
}

#[async_trait]
impl MempoolSource for HttpRpc {
    async fn mempool_content(&self) -> Result<MempoolSnapshot, RpcError> {
        let raw: RawContent = self.call("txpool_content", Vec::<String>::new()).await?;
        raw.into_snapshot()
    }
}

fn parse_quantity(s: &str) -> Result<u128, RpcError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::InvalidResponse(format!("quantity without 0x prefix: {s:?}")))?;
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad hex quantity {s:?}: {e}")))
}

fn parse_quantity_u64(s: &str) -> Result<u64, RpcError> {
    let value = parse_quantity(s)?;
    u64::try_from(value)
        .map_err(|_| RpcError::InvalidResponse(format!("quantity out of u64 range: {s:?}")))
}

/// Wire form of one transaction inside `txpool_content`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTx {
    hash: String,
    from: String,
    to: Option<String>,
    nonce: String,
    gas_price: String,
}

impl RpcTx {
    fn into_tx(self) -> Result<MemPoolTx, RpcError> {
        let hash: TxHash = self
            .hash
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("tx hash {:?}: {e}", self.hash)))?;
        let from: Address = self
            .from
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("tx sender {:?}: {e}", self.from)))?;
        let to = match &self.to {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e| RpcError::InvalidResponse(format!("tx recipient {raw:?}: {e}")))?,
            ),
            None => None,
        };
        let nonce = parse_quantity_u64(&self.nonce)?;
        let gas_price = parse_quantity(&self.gas_price)?;
        Ok(MemPoolTx::new(hash, from, to, nonce, gas_price))
    }
}

/// Wire form of the whole `txpool_content` result.
#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    pending: HashMap<String, HashMap<String, RpcTx>>,
    #[serde(default)]
    queued: HashMap<String, HashMap<String, RpcTx>>,
}

impl RawContent {
    fn into_snapshot(self) -> Result<MempoolSnapshot, RpcError> {
        Ok(MempoolSnapshot {
            pending: collect_side(self.pending)?,
            queued: collect_side(self.queued)?,
        })
    }
}

fn collect_side(
    raw: HashMap<String, HashMap<String, RpcTx>>,
) -> Result<PoolContent, RpcError> {
    let mut content = PoolContent::new();
    for by_nonce in raw.into_values() {
        for raw_tx in by_nonce.into_values() {
            content.insert(raw_tx.into_tx()?);
        }
    }
    Ok(content)
}
