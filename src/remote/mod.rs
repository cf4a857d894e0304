//! Remote Operation Facade: every computation the orchestrator does not own
//! (valuation, scam filtering, AI field inference, image scoring) lives behind
//! this trait as an opaque async call.

mod http;

pub use http::{HttpRemote, HttpRemoteConfig};

use crate::models::{
    AttributeMap, BuyAnalysis, ImageAnalysis, ImageUpload, ProductField, RefinementCheck,
    SellAdvice,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The call was cancelled by a superseding action. Never user-visible.
    #[error("request cancelled")]
    Cancelled,
    /// The service rejected the request with a human-readable message.
    #[error("{message}")]
    Service { message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RemoteError {
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait RemoteOps: Send + Sync {
    /// Ask whether the query is too broad to search as-is.
    async fn check_refinement(&self, query: &str) -> RemoteResult<RefinementCheck>;

    /// Buy-side deal analytics for a query.
    async fn analyze_buy(&self, query: &str) -> RemoteResult<BuyAnalysis>;

    /// Sell-side pricing advice. `cancel` is honoured at the network level so
    /// a superseded recompute stops doing work instead of being merely ignored.
    async fn sell_advice(
        &self,
        query: &str,
        condition: Option<u8>,
        details: &AttributeMap,
        cancel: CancellationToken,
    ) -> RemoteResult<SellAdvice>;

    /// AI-inferred attribute form fields for a product.
    async fn product_fields(&self, query: &str) -> RemoteResult<Vec<ProductField>>;

    /// Image-based condition scoring plus product/attribute detection.
    async fn analyze_image(&self, upload: ImageUpload) -> RemoteResult<ImageAnalysis>;
}
