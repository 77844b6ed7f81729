use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::config::MarketDataSettings;
use crate::db::models::{ConcentrationSample, PriceCapSample, TrackedAsset};
use crate::error::{AppError, Result};
use crate::source::payload::{self, AnalyticsData, ChartData, DetailData};
use crate::source::{MarketDataSource, TimeWindow};

const CHART_PATH: &str = "/data-api/v3/cryptocurrency/detail/chart";
const ANALYTICS_PATH: &str = "/data-api/v3/cryptocurrency/info/get-analytics";
const DETAIL_PATH: &str = "/data-api/v3/cryptocurrency/detail";

const HEADER_REQUEST_ID: &str = "X-Request-Id";
const HEADER_PLATFORM: &str = "platform";
const PLATFORM_WEB: &str = "web";

/// HTTP client for the CoinMarketCap public data API.
///
/// No retries: a failed request fails the import cycle, which the next scheduled cycle repeats.
#[derive(Clone)]
pub struct CmcClient {
    http: Client,
    base_url: Url,
}

impl CmcClient {
    pub fn new(settings: &MarketDataSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| {
            AppError::bad_request(format!("invalid market data url {}: {}", settings.base_url, e))
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| AppError::internal(format!("build url for {}: {}", path, e)))?;
        url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    /// Issues a GET and decodes the envelope's data block.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let request_id = Uuid::new_v4().to_string();
        debug!("GET {} (request id {})", url, request_id);

        let response = self
            .http
            .get(url.clone())
            .header(HEADER_REQUEST_ID, &request_id)
            .header(HEADER_PLATFORM, PLATFORM_WEB)
            .send()
            .await
            .map_err(|e| {
                error!("Request {} failed: {} (request id {})", url, e, request_id);
                AppError::from(e)
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("{} (request id {})", url.path(), request_id)));
        }

        let body = response.bytes().await?;
        if !status.is_success() {
            error!(
                "Request {} returned {}: {} (request id {})",
                url,
                status,
                String::from_utf8_lossy(&body),
                request_id
            );
            return Err(AppError::internal(format!(
                "{} returned {} (request id {})",
                url.path(),
                status,
                request_id
            )));
        }

        payload::decode(&body).map_err(|e| {
            error!("Bad response from {}: {} (request id {})", url, e, request_id);
            e.context(format!("request id {}", request_id))
        })
    }
}

#[async_trait]
impl MarketDataSource for CmcClient {
    async fn fetch_price_cap(
        &self,
        asset_id: i64,
        window: TimeWindow,
    ) -> Result<Vec<PriceCapSample>> {
        let url = self.url(
            CHART_PATH,
            &[("id", asset_id.to_string()), ("range", window.label().to_string())],
        )?;
        match self.get::<ChartData>(url).await? {
            Some(data) => data.into_samples(asset_id),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_concentration(
        &self,
        asset_id: i64,
        window: TimeWindow,
    ) -> Result<Vec<ConcentrationSample>> {
        let url = self.url(
            ANALYTICS_PATH,
            &[
                ("cryptoId", asset_id.to_string()),
                ("timeRangeType", window.analytics_label().to_string()),
            ],
        )?;
        match self.get::<AnalyticsData>(url).await? {
            Some(data) => data.into_samples(asset_id),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_asset_metadata(&self, slug: &str) -> Result<TrackedAsset> {
        let url = self.url(DETAIL_PATH, &[("slug", slug.to_string())])?;
        match self.get::<DetailData>(url).await? {
            Some(data) => Ok(data.into()),
            None => Err(AppError::not_found(format!("asset {}", slug))),
        }
    }
}
