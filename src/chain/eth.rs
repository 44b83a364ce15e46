//! EVM Chain Gateway
//!
//! Talks to a Ganache/Anvil/Geth node over JSON-RPC. Transfers are sent with
//! `eth_sendTransaction` (the node holds the unlocked sender keys) and then the
//! receipt is polled until it lands or the receipt timeout elapses.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BlockRange, ChainError, ChainGateway, TxRecord, ensure_well_formed, normalize_address,
};
use crate::config::ChainConfig;
use crate::core_types::TxHash;
use crate::money::{Amount, eth_to_wei, format_hex_wei, parse_hex_wei, wei_to_eth};

/// Concurrent block fetches while listing history
const HISTORY_FETCH_CONCURRENCY: usize = 8;

const GWEI: u128 = 1_000_000_000;

/// Serializes as `[]`
const NO_PARAMS: [u8; 0] = [];

/// Gateway to an EVM node via JSON-RPC
pub struct EthGateway {
    config: ChainConfig,
    client: reqwest::Client,
}

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Failure of a single RPC round trip
#[derive(Debug)]
enum RpcFailure {
    /// Transport failure or undecodable response
    Transport(String),
    /// Node answered with a JSON-RPC error object
    Node { code: i64, message: String },
}

impl From<RpcFailure> for ChainError {
    fn from(f: RpcFailure) -> Self {
        match f {
            RpcFailure::Transport(msg) => ChainError::Unavailable(msg),
            RpcFailure::Node { code, message } => {
                ChainError::Unavailable(format!("RPC error {}: {}", code, message))
            }
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthSendTransaction {
    from: String,
    to: String,
    value: String,
    gas: String,
    gas_price: String,
    nonce: String,
    chain_id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

/// ETH block structure from RPC
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthBlock {
    number: String,
    transactions: Vec<EthTransaction>,
}

/// ETH transaction structure from RPC
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
}

impl EthGateway {
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        info!(
            rpc_url = %config.rpc_url,
            chain_id = config.chain_id,
            "Initializing EVM chain gateway"
        );

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ChainError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Make a JSON-RPC call that must produce a result
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.rpc_call_opt(method, params)
            .await?
            .ok_or_else(|| RpcFailure::Transport(format!("{}: no result in response", method)))
    }

    /// Make a JSON-RPC call whose result may legitimately be `null`
    async fn rpc_call_opt<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{} request failed: {}", method, e)))?;

        let rpc_response: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            RpcFailure::Transport(format!("{}: failed to parse response: {}", method, e))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(RpcFailure::Node {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    /// Latest block height known to the node
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let height: String = self.rpc_call("eth_blockNumber", NO_PARAMS).await?;
        u64::from_str_radix(height.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::Unavailable(format!("Invalid block number: {}", e)))
    }

    async fn pending_nonce(&self, from: &str) -> Result<String, ChainError> {
        Ok(self
            .rpc_call("eth_getTransactionCount", (from, "pending"))
            .await?)
    }

    /// Poll for the receipt of `tx_hash` until it arrives or the receipt
    /// timeout elapses. Transport errors while polling are retried.
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<EthReceipt, ChainError> {
        let poll = async {
            loop {
                let receipt: Result<Option<EthReceipt>, RpcFailure> = self
                    .rpc_call_opt("eth_getTransactionReceipt", [tx_hash.as_str()])
                    .await;
                match receipt {
                    Ok(Some(r)) => return r,
                    Ok(None) => {}
                    Err(e) => debug!(tx_hash = %tx_hash, error = ?e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.config.receipt_poll_interval()).await;
            }
        };

        tokio::time::timeout(self.config.receipt_timeout(), poll)
            .await
            .map_err(|_| {
                warn!(tx_hash = %tx_hash, "Receipt timeout - transfer outcome unknown");
                ChainError::Unavailable(format!(
                    "no receipt for {} within {}ms; outcome unknown",
                    tx_hash, self.config.receipt_timeout_ms
                ))
            })
    }

    async fn fetch_block(&self, height: u64) -> Result<EthBlock, ChainError> {
        let height_hex = format!("0x{:x}", height);
        Ok(self
            .rpc_call("eth_getBlockByNumber", (height_hex, true))
            .await?)
    }
}

/// Interpret a receipt's status field
fn check_receipt(receipt: &EthReceipt) -> Result<TxHash, ChainError> {
    let tx_hash = TxHash::new(receipt.transaction_hash.clone());
    match receipt.status.as_deref() {
        Some("0x1") | Some("0x01") => Ok(tx_hash),
        Some(status) => Err(ChainError::Reverted {
            tx_hash: Some(tx_hash),
            reason: format!("receipt status {}", status),
        }),
        // Pre-Byzantium receipts carry no status; inclusion is success
        None => Ok(tx_hash),
    }
}

/// Records in `block` touching `address`. A field the node sent but we
/// cannot decode fails the whole query rather than yielding a zero record.
fn block_to_records(block: EthBlock, address: &str) -> Result<Vec<TxRecord>, ChainError> {
    let height = u64::from_str_radix(block.number.trim_start_matches("0x"), 16).map_err(|e| {
        ChainError::Unavailable(format!("Invalid block number {}: {}", block.number, e))
    })?;

    block
        .transactions
        .into_iter()
        .filter(|tx| {
            normalize_address(&tx.from) == address
                || tx.to.as_deref().map(normalize_address).as_deref() == Some(address)
        })
        .map(|tx| {
            let wei = parse_hex_wei(&tx.value).map_err(|e| {
                ChainError::Unavailable(format!("Invalid value in tx {}: {}", tx.hash, e))
            })?;
            Ok(TxRecord {
                tx_hash: TxHash::new(tx.hash),
                block_number: height,
                from: tx.from,
                to: tx.to,
                amount: wei_to_eth(wei),
            })
        })
        .collect()
}

#[async_trait]
impl ChainGateway for EthGateway {
    async fn validate_address(&self, address: &str) -> Result<bool, ChainError> {
        ensure_well_formed(address)?;

        let accounts: Vec<String> = self.rpc_call("eth_accounts", NO_PARAMS).await?;
        let wanted = normalize_address(address);
        Ok(accounts.iter().any(|a| normalize_address(a) == wanted))
    }

    async fn get_balance(&self, address: &str) -> Result<Amount, ChainError> {
        ensure_well_formed(address)?;

        let balance: String = self
            .rpc_call("eth_getBalance", (address, "latest"))
            .await?;
        let wei = parse_hex_wei(&balance)
            .map_err(|e| ChainError::Unavailable(format!("Invalid balance: {}", e)))?;
        Ok(wei_to_eth(wei))
    }

    async fn submit_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<TxHash, ChainError> {
        ensure_well_formed(from)?;
        ensure_well_formed(to)?;

        let value = eth_to_wei(amount).map_err(|e| ChainError::Reverted {
            tx_hash: None,
            reason: format!("amount not representable in wei: {}", e),
        })?;

        let nonce = self.pending_nonce(from).await?;
        let tx = EthSendTransaction {
            from: from.to_string(),
            to: to.to_string(),
            value: format_hex_wei(value),
            gas: format!("0x{:x}", self.config.gas_limit),
            gas_price: format_hex_wei(self.config.gas_price_gwei as u128 * GWEI),
            nonce,
            chain_id: format!("0x{:x}", self.config.chain_id),
        };

        // A node-level rejection means the transaction was never accepted;
        // a transport failure leaves the outcome unknown.
        let tx_hash: String = match self.rpc_call("eth_sendTransaction", [&tx]).await {
            Ok(hash) => hash,
            Err(RpcFailure::Node { code, message }) => {
                warn!(from, to, code, %message, "Node rejected transfer");
                return Err(ChainError::Reverted {
                    tx_hash: None,
                    reason: format!("rejected by node ({}): {}", code, message),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let tx_hash = TxHash::new(tx_hash);
        debug!(tx_hash = %tx_hash, from, to, %amount, "Transfer sent, awaiting receipt");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let confirmed = check_receipt(&receipt)?;
        info!(
            tx_hash = %confirmed,
            block = receipt.block_number.as_deref().unwrap_or("?"),
            "Transfer confirmed"
        );
        Ok(confirmed)
    }

    async fn list_transactions(
        &self,
        address: &str,
        range: BlockRange,
    ) -> Result<Vec<TxRecord>, ChainError> {
        ensure_well_formed(address)?;
        range.ensure_bounded()?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let range = range.clamp_to(self.block_number().await?);
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let wanted = normalize_address(address);
        let blocks: Vec<EthBlock> = stream::iter(range.from..=range.to)
            .map(|h| self.fetch_block(h))
            .buffered(HISTORY_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let mut records = Vec::new();
        for block in blocks {
            records.extend(block_to_records(block, &wanted)?);
        }
        Ok(records)
    }
}
