use crate::core::{blockchain::Blockchain, error::BlockchainError};
use arbor_common::{
    config::{ORACLE_BLOCKS, ORACLE_DEFAULT_PRICE, ORACLE_MAX_PRICE, ORACLE_PERCENTILE},
    crypto::Hash,
};
use log::trace;
use primitive_types::U256;
use std::sync::{Arc, Mutex};

struct OracleCache {
    tip: Hash,
    price: U256,
}

/// Gas price suggestion from a rolling window of recent blocks.
/// Thread safe; the window is re-sampled lazily whenever the tip
/// moved since the last call.
pub struct GasOracle {
    chain: Arc<Blockchain>,
    blocks: usize,
    percentile: usize,
    default_price: U256,
    max_price: U256,
    cache: Mutex<Option<OracleCache>>,
}

impl GasOracle {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self {
            chain,
            blocks: ORACLE_BLOCKS,
            percentile: ORACLE_PERCENTILE,
            default_price: U256::from(ORACLE_DEFAULT_PRICE),
            max_price: U256::from(ORACLE_MAX_PRICE),
            cache: Mutex::new(None),
        }
    }

    /// Percentile gas price over the transactions of the most recent
    /// blocks, clamped into the configured band.
    pub fn suggest(&self) -> Result<U256, BlockchainError> {
        let tip = self.chain.best_hash()?;

        {
            let cache = self
                .cache
                .lock()
                .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
            if let Some(cached) = cache.as_ref() {
                if cached.tip == tip {
                    return Ok(cached.price);
                }
            }
        }

        let price = self.sample(&tip)?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        *cache = Some(OracleCache {
            tip,
            price,
        });
        Ok(price)
    }

    fn sample(&self, tip: &Hash) -> Result<U256, BlockchainError> {
        let mut prices = Vec::new();
        let mut cursor = tip.clone();

        for _ in 0..self.blocks {
            let block = self.chain.get_block_by_hash(&cursor)?;
            for tx in block.get_transactions() {
                prices.push(tx.get_gas_price());
            }
            if block.get_height() == 0 {
                break;
            }
            cursor = block.get_previous_hash().clone();
        }

        if prices.is_empty() {
            return Ok(self.default_price);
        }

        prices.sort();
        let index = (prices.len() - 1) * self.percentile / 100;
        let price = prices[index];
        trace!("oracle sampled {} prices, suggesting {}", prices.len(), price);

        Ok(price.max(self.default_price).min(self.max_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_index() {
        // 60th percentile over a 10 element window picks index 5
        let len = 10usize;
        assert_eq!((len - 1) * ORACLE_PERCENTILE / 100, 5);
    }
}
