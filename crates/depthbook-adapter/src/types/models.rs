/*
[INPUT]:  Depth REST/stream schema and serde requirements
[OUTPUT]: Wire structs plus the validated domain types handed to the replica
[POS]:    Data layer - type definitions for depth snapshots and diffs
[UPDATE]: When the venue schema changes or new fields are carried
*/

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::Side;

/// A `[price, quantity]` pair as sent on the wire.
///
/// The venue sends strings; numeric JSON is accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel(
    #[serde(
        deserialize_with = "serde_helpers::deserialize_decimal",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub Decimal,
    #[serde(
        deserialize_with = "serde_helpers::deserialize_decimal",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub Decimal,
);

impl DepthLevel {
    /// Validate and convert into a domain level.
    ///
    /// Prices must be positive and quantities non-negative. Both are normalized
    /// so `1.10` and `1.1` render identically (comparison is exact either way).
    pub fn into_price_level(self) -> Result<PriceLevel, String> {
        let DepthLevel(price, quantity) = self;
        if price <= Decimal::ZERO {
            return Err(format!("non-positive price {price}"));
        }
        if quantity.is_sign_negative() && !quantity.is_zero() {
            return Err(format!("negative quantity {quantity} at price {price}"));
        }
        Ok(PriceLevel::new(price.normalize(), quantity.normalize()))
    }
}

/// Resting interest at one price. `quantity == 0` in an update means removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// Full point-in-time capture of both sides.
///
/// `sequence` is the last update id already reflected in the levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
}

impl Snapshot {
    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }
}

/// Incremental change set covering update ids `first_update_id..=final_update_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEvent {
    pub symbol: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    /// Futures streams report the previous event's final id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_final_update_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub bid_changes: Vec<PriceLevel>,
    pub ask_changes: Vec<PriceLevel>,
}

impl DiffEvent {
    pub fn changes(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bid_changes,
            Side::Ask => &self.ask_changes,
        }
    }

    /// Whether this event contains update id `id`.
    pub fn covers(&self, id: u64) -> bool {
        self.first_update_id <= id && id <= self.final_update_id
    }
}

/// `GET /depth` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<i64>,
}

impl DepthSnapshotResponse {
    pub fn into_snapshot(self, symbol: &str) -> Result<Snapshot, String> {
        Ok(Snapshot {
            symbol: symbol.to_string(),
            bids: convert_levels(self.bids)?,
            asks: convert_levels(self.asks)?,
            sequence: self.last_update_id,
        })
    }
}

/// `depthUpdate` stream payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdateMessage {
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<i64>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "pu", default, skip_serializing_if = "Option::is_none")]
    pub previous_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    pub bids: Vec<DepthLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<DepthLevel>,
}

impl DepthUpdateMessage {
    pub fn into_diff_event(self) -> Result<DiffEvent, String> {
        if let Some(event_type) = &self.event_type
            && event_type != "depthUpdate"
        {
            return Err(format!("unexpected event type {event_type}"));
        }
        if self.first_update_id > self.final_update_id {
            return Err(format!(
                "first update id {} exceeds final update id {}",
                self.first_update_id, self.final_update_id
            ));
        }

        Ok(DiffEvent {
            symbol: self.symbol.unwrap_or_default().to_ascii_uppercase(),
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            previous_final_update_id: self.previous_final_update_id,
            event_time: self.event_time.and_then(millis_to_datetime),
            bid_changes: convert_levels(self.bids)?,
            ask_changes: convert_levels(self.asks)?,
        })
    }
}

fn convert_levels(levels: Vec<DepthLevel>) -> Result<Vec<PriceLevel>, String> {
    levels.into_iter().map(DepthLevel::into_price_level).collect()
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

mod serde_helpers {
    use super::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use std::str::FromStr;

    pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let raw = match &value {
            Value::String(raw) => raw.trim().to_string(),
            Value::Number(number) => number.to_string(),
            _ => return Err(serde::de::Error::custom("invalid decimal value")),
        };

        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(serde::de::Error::custom)
    }

    pub fn serialize_decimal<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}
