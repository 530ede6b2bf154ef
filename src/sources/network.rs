use serde_json::Value;

use super::{FetchError, HttpFetcher, api_base};
use crate::entity::DEFAULT_MEMPOOL_API;

/// Raw inputs of the network health composite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkReading {
    /// Unix seconds of the most recent block.
    pub last_block_time: i64,
    pub mempool_vsize: Option<f64>,
    pub mempool_count: Option<i64>,
    pub fastest_fee: Option<i64>,
}

impl NetworkReading {
    pub fn mempool_mb(&self) -> Option<f64> {
        self.mempool_vsize.map(|v| v / 1_000_000.0)
    }
}

pub async fn fetch(http: &HttpFetcher, base: Option<&str>) -> Result<NetworkReading, FetchError> {
    let base = api_base(base, DEFAULT_MEMPOOL_API);
    let blocks_url = format!("{base}/blocks");
    let mempool_url = format!("{base}/mempool");
    let fees_url = format!("{base}/v1/fees/recommended");
    let (blocks, mempool, fees) = tokio::try_join!(
        http.get_json::<Value>(&blocks_url),
        http.get_json::<Value>(&mempool_url),
        http.get_json::<Value>(&fees_url),
    )?;
    parse_reading(&blocks, &mempool, &fees)
}

/// The block list is mandatory; mempool and fee documents are best effort.
pub fn parse_reading(
    blocks: &Value,
    mempool: &Value,
    fees: &Value,
) -> Result<NetworkReading, FetchError> {
    let tip = blocks
        .as_array()
        .and_then(|b| b.first())
        .filter(|b| b.is_object())
        .ok_or_else(|| FetchError::Parse("blocks: unexpected shape".to_string()))?;
    let last_block_time = tip
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| FetchError::Parse("blocks: block time missing".to_string()))?;

    Ok(NetworkReading {
        last_block_time,
        mempool_vsize: mempool.get("vsize").and_then(Value::as_f64),
        mempool_count: mempool.get("count").and_then(Value::as_i64),
        fastest_fee: fees.get("fastestFee").and_then(Value::as_i64),
    })
}
