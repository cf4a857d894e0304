use super::{RemoteError, RemoteOps, RemoteResult};
use crate::models::{
    AttributeMap, BuyAnalysis, ImageAnalysis, ImageUpload, ProductField, RefinementCheck,
    SellAdvice,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpRemoteConfig {
    pub fn from_env() -> Self {
        let timeout = std::env::var("MARKETMAKER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let connect = std::env::var("MARKETMAKER_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        Self {
            base_url: std::env::var("MARKETMAKER_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".into()),
            timeout: Duration::from_secs(timeout),
            connect_timeout: Duration::from_secs(connect),
        }
    }
}

/// Facade implementation backed by the MarketMaker HTTP API.
pub struct HttpRemote {
    http: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(HttpRemoteConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> RemoteResult<T> {
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(RemoteError::service(detail));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteOps for HttpRemote {
    async fn check_refinement(&self, query: &str) -> RemoteResult<RefinementCheck> {
        let response = self
            .http
            .post(self.url("/api/refine-query"))
            .json(&QueryBody { query })
            .send()
            .await?;
        let body: RefineQueryResponse = Self::read_json(response).await?;
        Ok(RefinementCheck {
            needs_refinement: body.needs_refinement,
            fields: body.fields,
        })
    }

    async fn analyze_buy(&self, query: &str) -> RemoteResult<BuyAnalysis> {
        let response = self
            .http
            .get(self.url("/api/market-maker"))
            .query(&[("query", query)])
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn sell_advice(
        &self,
        query: &str,
        condition: Option<u8>,
        details: &AttributeMap,
        cancel: CancellationToken,
    ) -> RemoteResult<SellAdvice> {
        let body = SellAdvisorBody {
            query,
            condition,
            details: if details.is_empty() {
                None
            } else {
                Some(details)
            },
        };
        let request = self.http.post(self.url("/api/sell-advisor")).json(&body);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            result = request.send() => result?,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(RemoteError::Cancelled),
            advice = Self::read_json(response) => advice,
        }
    }

    async fn product_fields(&self, query: &str) -> RemoteResult<Vec<ProductField>> {
        let response = self
            .http
            .post(self.url("/api/product-fields"))
            .json(&QueryBody { query })
            .send()
            .await?;
        let body: ProductFieldsResponse = Self::read_json(response).await?;
        Ok(body.fields)
    }

    async fn analyze_image(&self, upload: ImageUpload) -> RemoteResult<ImageAnalysis> {
        let part = reqwest::multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|err| RemoteError::service(err.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("/api/analyze-upload"))
            .multipart(form)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
}

#[derive(Debug, Serialize)]
struct SellAdvisorBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a AttributeMap>,
}

#[derive(Debug, Deserialize)]
struct RefineQueryResponse {
    needs_refinement: bool,
    #[serde(default)]
    fields: Vec<ProductField>,
}

#[derive(Debug, Deserialize)]
struct ProductFieldsResponse {
    #[serde(default)]
    fields: Vec<ProductField>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}
