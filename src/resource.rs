use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Exchange endpoint being polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ResourceKind {
    #[serde(rename = "get_balances", alias = "balances")]
    Balances,
    #[serde(rename = "order_history")]
    OrderHistory,
    #[serde(rename = "trade_history")]
    TradeHistory,
}

/// How a current record is matched against the previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Unchanged only if an identical record exists in the previous list
    WholeRecord,
    /// Unchanged if any previous record carries the same identity
    Identity,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Balances,
        ResourceKind::OrderHistory,
        ResourceKind::TradeHistory,
    ];

    /// Name used in configuration and emitted events
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Balances => "get_balances",
            ResourceKind::OrderHistory => "order_history",
            ResourceKind::TradeHistory => "trade_history",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Balances => "/v5/account/wallet-balance",
            ResourceKind::OrderHistory => "/v5/order/history",
            ResourceKind::TradeHistory => "/spot/v3/private/my-trades",
        }
    }

    pub fn match_rule(self) -> MatchRule {
        match self {
            ResourceKind::OrderHistory => MatchRule::Identity,
            ResourceKind::Balances | ResourceKind::TradeHistory => MatchRule::WholeRecord,
        }
    }

    /// Whether the endpoint takes a page size
    pub fn requires_limit(self) -> bool {
        !matches!(self, ResourceKind::Balances)
    }

    /// Build the query string for one request
    ///
    /// The link id is a throwaway idempotency key; a new one is drawn per call.
    pub fn query(self, limit: u32) -> String {
        match self {
            ResourceKind::Balances => "accountType=UNIFIED".to_string(),
            ResourceKind::OrderHistory => format!(
                "orderLinkId={}&limit={}&category=spot",
                Uuid::new_v4(),
                limit
            ),
            ResourceKind::TradeHistory => {
                format!("tradeLinkId={}&limit={}", Uuid::new_v4(), limit)
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "balances" {
            return Ok(ResourceKind::Balances);
        }

        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "type has invalid value '{}': should be 'get_balances', 'order_history' or 'trade_history'",
                    s
                )
            })
    }
}
