//! Ethereum JSON-RPC [`BlockSource`] over HTTP.
//!
//! One `eth_getBlockByNumber` call per block (full transactions) and one
//! `eth_getTransactionReceipt` call per transaction.

use std::time::Duration;

use eyre::{bail, eyre, Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::mined::{BlockSource, MinedBlock, MinedTransaction};

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    gas_used: String,
    base_fee_per_gas: Option<String>,
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    #[serde(rename = "type")]
    tx_type: Option<String>,
    gas_price: Option<String>,
    max_priority_fee_per_gas: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    gas_used: String,
    effective_gas_price: Option<String>,
}

/// Parses a hex quantity such as `0x5208`.
fn quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| eyre!("quantity '{value}' lacks the 0x prefix"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).wrap_err_with(|| format!("invalid quantity '{value}'"))
}

fn optional_quantity(value: Option<&str>) -> Result<Option<u128>> {
    value.map(quantity).transpose()
}

/// Joins a block with the receipts of its transactions, in order.
///
/// Transactions whose receipt is missing are left out.
fn mined_block(block: RpcBlock, receipts: Vec<Option<RpcReceipt>>) -> Result<MinedBlock> {
    let number = u64::try_from(quantity(&block.number)?)
        .wrap_err_with(|| format!("block number {} out of range", block.number))?;
    let base_fee = optional_quantity(block.base_fee_per_gas.as_deref())?.unwrap_or(0);

    let mut transactions = Vec::with_capacity(block.transactions.len());
    for (tx, receipt) in block.transactions.into_iter().zip(receipts) {
        let Some(receipt) = receipt else {
            debug!(block_number = number, hash = %tx.hash, "receipt missing, transaction skipped");
            continue;
        };
        let tx_type = optional_quantity(tx.tx_type.as_deref())?.unwrap_or(0);
        transactions.push(MinedTransaction {
            tx_type: u8::try_from(tx_type).unwrap_or(u8::MAX),
            gas_used: quantity(&receipt.gas_used)?,
            max_priority_fee: optional_quantity(tx.max_priority_fee_per_gas.as_deref())?.unwrap_or(0),
            effective_gas_price: optional_quantity(receipt.effective_gas_price.as_deref())?,
            gas_price: optional_quantity(tx.gas_price.as_deref())?,
            hash: tx.hash,
        });
    }

    Ok(MinedBlock {
        number,
        base_fee,
        gas_used: quantity(&block.gas_used)?,
        transactions,
    })
}

/// Blocking JSON-RPC client for an Ethereum node.
pub struct RpcBlockSource {
    client: Client,
    url: String,
}

impl RpcBlockSource {
    /// Creates a client for `url` and checks connectivity with
    /// `eth_blockNumber`.
    ///
    /// # Errors
    /// Returns error if the client cannot be built or the node does not
    /// answer.
    #[tracing::instrument(skip_all, fields(url = %url))]
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("failed to build HTTP client")?;
        let source = Self {
            client,
            url: url.to_string(),
        };

        let latest = source
            .latest_block()
            .wrap_err("failed to test RPC connectivity with eth_blockNumber")?;
        info!(url = %url, latest_block = latest, "RPC connection successful");
        Ok(source)
    }

    /// Current chain head.
    ///
    /// # Errors
    /// Returns error if the call fails or the node returns no number.
    pub fn latest_block(&self) -> Result<u64> {
        let head: String = self
            .call("eth_blockNumber", json!([]))?
            .ok_or_else(|| eyre!("eth_blockNumber returned no result"))?;
        u64::try_from(quantity(&head)?).wrap_err("chain head out of range")
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .wrap_err_with(|| format!("{method} request failed"))?
            .error_for_status()
            .wrap_err_with(|| format!("{method} returned an HTTP error"))?
            .json()
            .wrap_err_with(|| format!("{method} returned an unreadable body"))?;

        if let Some(error) = response.error {
            bail!("{method} failed ({}): {}", error.code, error.message);
        }
        Ok(response.result)
    }
}

impl BlockSource for RpcBlockSource {
    fn fetch_block(&self, number: u64) -> Result<Option<MinedBlock>> {
        let Some(block) =
            self.call::<RpcBlock>("eth_getBlockByNumber", json!([format!("0x{number:x}"), true]))?
        else {
            return Ok(None);
        };

        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            receipts.push(self.call::<RpcReceipt>("eth_getTransactionReceipt", json!([tx.hash]))?);
        }

        mined_block(block, receipts).map(Some)
    }
}
