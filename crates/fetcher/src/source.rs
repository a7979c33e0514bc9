//! The chain-source seam between the cycle loop and the Schwab client.

use async_trait::async_trait;

use gexray_schwab::{ChainData, SchwabClient, SchwabError};

/// Anything that can produce a parsed option chain for a symbol.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn option_chain(&self, symbol: &str) -> Result<ChainData, SchwabError>;
}

#[async_trait]
impl ChainSource for SchwabClient {
    async fn option_chain(&self, symbol: &str) -> Result<ChainData, SchwabError> {
        SchwabClient::option_chain(self, symbol).await
    }
}
