//! Records carried in JSON response payloads.
//!
//! The server sends most numbers as JSON strings (`"Volume":"10000"`), so
//! numeric fields go through [`string_or_number`].

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `TYPE` value for a plain balance operation.
pub const DEAL_ACTION_BALANCE: u8 = 2;

/// Closed or open deal from the history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Deal {
    #[serde(deserialize_with = "string_or_number")]
    pub deal: u64,
    #[serde(rename = "ExternalID")]
    pub external_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub login: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub dealer: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub order: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub action: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub entry: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub reason: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub digits: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub time: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub time_msc: i64,
    pub symbol: String,
    #[serde(deserialize_with = "string_or_number")]
    pub price: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub volume: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub profit: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub storage: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub commission: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub fee: f64,
    #[serde(rename = "PositionID", deserialize_with = "string_or_number")]
    pub position_id: u64,
    pub comment: String,
}

/// Open position.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Position {
    #[serde(deserialize_with = "string_or_number")]
    pub position: u64,
    #[serde(rename = "ExternalID")]
    pub external_id: String,
    pub login: String,
    #[serde(deserialize_with = "string_or_number")]
    pub dealer: u64,
    pub symbol: String,
    #[serde(deserialize_with = "string_or_number")]
    pub action: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub digits: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub reason: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub time_create: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub time_update: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub price_open: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub price_current: f64,
    #[serde(rename = "PriceSL", deserialize_with = "string_or_number")]
    pub price_sl: f64,
    #[serde(rename = "PriceTP", deserialize_with = "string_or_number")]
    pub price_tp: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub volume: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub profit: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub storage: f64,
    pub comment: String,
}

/// Trading account record from `USER_GET`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct User {
    pub login: String,
    pub group: String,
    #[serde(deserialize_with = "string_or_number")]
    pub rights: u16,
    #[serde(deserialize_with = "string_or_number")]
    pub registration: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub last_access: i64,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub country: String,
    pub city: String,
    pub email: String,
    pub phone: String,
    pub status: String,
    pub comment: String,
    #[serde(deserialize_with = "string_or_number")]
    pub leverage: u32,
    #[serde(deserialize_with = "string_or_number")]
    pub agent: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub balance: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub credit: f64,
}

/// Accepts `"42"`, `42` or `""` (as the type's default).
pub fn string_or_number<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr + Default,
    T::Err: Display,
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) if text.is_empty() => Ok(T::default()),
        Value::String(text) => text.parse().map_err(serde::de::Error::custom),
        Value::Number(num) => num.to_string().parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(T::default()),
        other => Err(serde::de::Error::custom(format!(
            "expected a number or numeric string, got {other}"
        ))),
    }
}
