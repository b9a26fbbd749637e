use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ExchangeError;
use crate::resource::ResourceKind;

/// Response envelope shared by every Bybit endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
}

impl Envelope {
    /// Reject bodies the exchange flagged as failed despite a 2xx status
    pub fn check(body: &Value) -> Result<(), ExchangeError> {
        let envelope = Envelope::deserialize(body)
            .map_err(|e| ExchangeError::Parse(format!("missing response envelope: {}", e)))?;

        if envelope.ret_code != 0 {
            return Err(ExchangeError::Api {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }

        Ok(())
    }
}

/// Identity of an order, as the exchange reports it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Numeric(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// One coin line of a wallet account
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRecord {
    pub coin: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: RecordId,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub fields: Map<String, Value>,
}

/// One line item of a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Balance(BalanceRecord),
    Order(OrderRecord),
    Trade(TradeRecord),
}

impl Record {
    /// Parse a single list item for the given kind
    pub fn parse(kind: ResourceKind, item: &Value) -> Result<Self, ExchangeError> {
        let fields = item
            .as_object()
            .ok_or_else(|| {
                ExchangeError::Parse(format!("{} entry is not an object: {}", kind, item))
            })?
            .clone();

        match kind {
            ResourceKind::Balances => {
                let coin = fields
                    .get("coin")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ExchangeError::Parse(format!("balance entry without coin: {}", item))
                    })?
                    .to_string();
                Ok(Record::Balance(BalanceRecord { coin, fields }))
            }
            ResourceKind::OrderHistory => {
                let id = fields
                    .get("id")
                    .or_else(|| fields.get("orderId"))
                    .and_then(record_id)
                    .ok_or_else(|| {
                        ExchangeError::Parse(format!("order entry without id: {}", item))
                    })?;
                Ok(Record::Order(OrderRecord { id, fields }))
            }
            ResourceKind::TradeHistory => Ok(Record::Trade(TradeRecord { fields })),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            Record::Balance(r) => &r.fields,
            Record::Order(r) => &r.fields,
            Record::Trade(r) => &r.fields,
        }
    }

    /// Identity used by the identity match rule, if the record has one
    pub fn id(&self) -> Option<&RecordId> {
        match self {
            Record::Order(r) => Some(&r.id),
            _ => None,
        }
    }

    /// Short human-readable handle for logs
    pub fn label(&self) -> String {
        match self {
            Record::Balance(r) => r.coin.clone(),
            Record::Order(r) => r.id.to_string(),
            Record::Trade(r) => r
                .fields
                .get("tradeId")
                .or_else(|| r.fields.get("id"))
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| "trade".to_string()),
        }
    }

    /// The original JSON object, as emitted in events
    pub fn to_payload(&self) -> Value {
        Value::Object(self.fields().clone())
    }
}

fn record_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(RecordId::Numeric),
        _ => None,
    }
}

/// Extract the records of a response body
///
/// Balances flatten the `coin` arrays of every account in `result.list`;
/// the history endpoints list their entries directly.
pub fn parse_records(kind: ResourceKind, body: &Value) -> Result<Vec<Record>, ExchangeError> {
    let list = body
        .get("result")
        .ok_or_else(|| ExchangeError::Parse("response has no result".to_string()))?
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| ExchangeError::Parse("result.list is missing or not an array".to_string()))?;

    match kind {
        ResourceKind::Balances => {
            let mut records = Vec::new();
            for account in list {
                let coins = account.get("coin").and_then(Value::as_array).ok_or_else(|| {
                    ExchangeError::Parse("wallet account has no coin array".to_string())
                })?;
                for coin in coins {
                    records.push(Record::parse(kind, coin)?);
                }
            }
            Ok(records)
        }
        ResourceKind::OrderHistory | ResourceKind::TradeHistory => list
            .iter()
            .map(|item| Record::parse(kind, item))
            .collect(),
    }
}
