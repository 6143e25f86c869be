//! REST client for the Tinkoff Invest API gateway

use crate::data::Candle;
use crate::error::{ApiError, Error, Result};
use crate::exchange::credentials::Credential;
use crate::exchange::rotation::RotatingSource;
use crate::exchange::source::{CandleApi, FetchRequest};
use crate::exchange::wire::{
    GatewayError, GetCandlesRequest, GetCandlesResponse, InstrumentRequest, InstrumentResponse,
};
use crate::instrument::{Instrument, InstrumentDirectory};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Production REST endpoint
pub const DEFAULT_API_URL: &str = "https://invest-public-api.tinkoff.ru/rest";

const MARKET_DATA_SERVICE: &str = "tinkoff.public.invest.api.contract.v1.MarketDataService";
const INSTRUMENTS_SERVICE: &str = "tinkoff.public.invest.api.contract.v1.InstrumentsService";

// gRPC status codes carried in gateway error bodies
const CODE_NOT_FOUND: i32 = 5;
const CODE_RESOURCE_EXHAUSTED: i32 = 8;
const CODE_UNAVAILABLE: i32 = 14;

/// HTTP client for the market data and instruments services
#[derive(Debug, Clone)]
pub struct TinkoffClient {
    http: reqwest::Client,
    base_url: String,
}

impl TinkoffClient {
    /// Create new client against `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ApiError::from)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Tinkoff client initialized for: {}", base_url);
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Instrument metadata by uid, with one credential
    pub async fn get_instrument(
        &self,
        credential: &Credential,
        uid: &str,
    ) -> std::result::Result<Instrument, ApiError> {
        let response: InstrumentResponse = self
            .call(
                credential,
                INSTRUMENTS_SERVICE,
                "GetInstrumentBy",
                &InstrumentRequest::by_uid(uid),
            )
            .await?;
        Ok(response.instrument.into())
    }

    async fn call<B, R>(
        &self,
        credential: &Credential,
        service: &str,
        method: &str,
        body: &B,
    ) -> std::result::Result<R, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}/{}", self.base_url, service, method);
        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.token())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ApiError::Unavailable(e.to_string())
                } else {
                    ApiError::Request(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &text))
    }
}

/// Map a failed response to the error kinds the fetch loop reacts to
pub fn classify_failure(status: u16, body: &str) -> ApiError {
    let gateway: GatewayError = serde_json::from_str(body).unwrap_or_default();
    let message = if gateway.message.is_empty() {
        body.trim().to_string()
    } else if gateway.description.is_empty() {
        gateway.message.clone()
    } else {
        format!("{} ({})", gateway.message, gateway.description)
    };

    match (status, gateway.code) {
        (429, _) | (_, CODE_RESOURCE_EXHAUSTED) => ApiError::ResourceExhausted,
        (502..=504, _) | (_, CODE_UNAVAILABLE) => ApiError::Unavailable(message),
        (_, CODE_NOT_FOUND) => ApiError::Status { code: 404, message },
        _ => ApiError::Status {
            code: status,
            message,
        },
    }
}

#[async_trait]
impl CandleApi for TinkoffClient {
    async fn get_candles(
        &self,
        credential: &Credential,
        request: &FetchRequest,
    ) -> std::result::Result<Vec<Candle>, ApiError> {
        let body = GetCandlesRequest {
            instrument_id: &request.instrument_id,
            from: request.from,
            to: request.to,
            interval: request.interval.api_name(),
        };
        let response: GetCandlesResponse = self
            .call(credential, MARKET_DATA_SERVICE, "GetCandles", &body)
            .await?;
        debug!(
            instrument = %request.instrument_id,
            count = response.candles.len(),
            "candles received"
        );
        Ok(response.candles.into_iter().map(Candle::from).collect())
    }
}

#[async_trait]
impl InstrumentDirectory for RotatingSource<TinkoffClient> {
    async fn instrument_by_uid(&self, uid: &str) -> Result<Instrument> {
        loop {
            let credential = self.pool().acquire().await;
            match self.api().get_instrument(&credential, uid).await {
                Ok(instrument) => return Ok(instrument),
                Err(ApiError::ResourceExhausted) => {
                    self.pool().mark_exhausted(&credential).await;
                }
                Err(ApiError::Unavailable(message)) => {
                    warn!(uid, "instrument lookup unavailable: {}", message);
                    self.clock().sleep(self.config().unavailable_delay).await;
                }
                Err(ApiError::Status { code: 404, .. }) => {
                    return Err(Error::InstrumentNotFound(uid.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
