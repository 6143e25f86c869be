//! JSON bodies of the REST gateway

use crate::data::{Candle, Quotation};
use crate::instrument::Instrument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCandlesRequest<'a> {
    pub instrument_id: &'a str,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct GetCandlesResponse {
    #[serde(default)]
    pub candles: Vec<HistoricCandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricCandle {
    pub open: QuotationBody,
    pub high: QuotationBody,
    pub low: QuotationBody,
    pub close: QuotationBody,
    #[serde(default, deserialize_with = "int64")]
    pub volume: i64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub is_complete: Option<bool>,
}

impl From<HistoricCandle> for Candle {
    fn from(c: HistoricCandle) -> Self {
        Candle::new(
            Quotation::from(c.open).to_decimal(),
            Quotation::from(c.high).to_decimal(),
            Quotation::from(c.low).to_decimal(),
            Quotation::from(c.close).to_decimal(),
            c.volume,
            c.time,
            c.is_complete,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QuotationBody {
    #[serde(default, deserialize_with = "int64")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl From<QuotationBody> for Quotation {
    fn from(q: QuotationBody) -> Self {
        Quotation::new(q.units, q.nano)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRequest<'a> {
    pub id_type: &'static str,
    pub id: &'a str,
}

impl<'a> InstrumentRequest<'a> {
    pub fn by_uid(uid: &'a str) -> Self {
        Self {
            id_type: "INSTRUMENT_ID_TYPE_UID",
            id: uid,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InstrumentResponse {
    pub instrument: InstrumentBody,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentBody {
    pub uid: String,
    #[serde(default)]
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(rename = "first1minCandleDate", default)]
    pub first_1min_candle_date: Option<DateTime<Utc>>,
    #[serde(rename = "first1dayCandleDate", default)]
    pub first_1day_candle_date: Option<DateTime<Utc>>,
}

impl From<InstrumentBody> for Instrument {
    fn from(body: InstrumentBody) -> Self {
        Instrument::new(body.uid, body.figi, body.ticker)
            .with_first_candles(body.first_1min_candle_date, body.first_1day_candle_date)
    }
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Default, Deserialize)]
pub struct GatewayError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: String,
}

/// int64 fields arrive as JSON strings
fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
