//! Polygon WebSocket Message Types
//!
//! Wire format types for the Polygon stocks cluster.
//!
//! # Outbound
//!
//! ```json
//! {"action":"auth","params":"<api key>"}
//! {"action":"subscribe","params":["AM.AAPL","AM.MSFT"]}
//! ```
//!
//! Each channel name is `<prefix>.<SYMBOL>`.
//!
//! # Inbound
//!
//! Frames are JSON arrays of events discriminated by `ev`:
//!
//! - `A` / `AM`: per-second / per-minute aggregate bar
//! - `status`: connection and authentication status

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{EventType, Ohlcv, Symbol, TickerUpdate};

// =============================================================================
// Outbound
// =============================================================================

/// Action verb of an outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Authenticate with the API key.
    Auth,
    /// Subscribe to channels.
    Subscribe,
    /// Unsubscribe from channels.
    Unsubscribe,
}

impl Action {
    /// Get the action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Parameters of an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionParams {
    /// API key for `auth`.
    Credential(String),
    /// Channel names for `subscribe` / `unsubscribe`.
    Channels(Vec<String>),
}

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRequest {
    /// Command verb.
    pub action: Action,
    /// Command parameters.
    pub params: ActionParams,
}

impl ActionRequest {
    /// Authentication command.
    #[must_use]
    pub fn auth(api_key: &str) -> Self {
        Self {
            action: Action::Auth,
            params: ActionParams::Credential(api_key.to_string()),
        }
    }

    /// Subscribe command for `symbols` on the `prefix` channel.
    #[must_use]
    pub fn subscribe(prefix: &str, symbols: &[Symbol]) -> Self {
        Self {
            action: Action::Subscribe,
            params: ActionParams::Channels(channels(prefix, symbols)),
        }
    }

    /// Unsubscribe command for `symbols` on the `prefix` channel.
    #[must_use]
    pub fn unsubscribe(prefix: &str, symbols: &[Symbol]) -> Self {
        Self {
            action: Action::Unsubscribe,
            params: ActionParams::Channels(channels(prefix, symbols)),
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Map symbols to `<prefix>.<SYMBOL>` channel names.
#[must_use]
pub fn channels(prefix: &str, symbols: &[Symbol]) -> Vec<String> {
    symbols.iter().map(|s| format!("{prefix}.{s}")).collect()
}

// =============================================================================
// Inbound
// =============================================================================

/// Aggregate bar event.
///
/// Example:
/// ```json
/// {"ev":"AM","sym":"AAPL","o":150.0,"h":151.2,"l":149.8,"c":151.0,
///  "v":12000,"vw":150.7,"s":1700000000000,"e":1700000060000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMessage {
    /// Event type: `A` or `AM`.
    pub ev: EventType,
    /// Ticker symbol.
    pub sym: Symbol,
    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Volume.
    #[serde(rename = "v")]
    pub volume: Decimal,
    /// Volume weighted average price.
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,
    /// Bar start (epoch ms).
    #[serde(rename = "s", default)]
    pub start: Option<i64>,
    /// Bar end (epoch ms).
    #[serde(rename = "e", default)]
    pub end: Option<i64>,
}

impl AggregateMessage {
    /// Convert into the domain update. `None` when the bar's figures
    /// overflow decimal arithmetic.
    #[must_use]
    pub fn into_update(self) -> Option<TickerUpdate> {
        TickerUpdate::from_aggregate(
            self.sym,
            self.ev,
            Ohlcv {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
            },
            self.vwap,
            self.start.or(self.end),
        )
    }
}

/// Status event.
///
/// Example:
/// ```json
/// {"ev":"status","status":"auth_success","message":"authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Status code such as `connected`, `auth_success`, `auth_failed`.
    pub status: String,
    /// Human readable detail.
    #[serde(default)]
    pub message: String,
}

impl StatusMessage {
    /// Whether this marks a successful authentication.
    #[must_use]
    pub fn is_auth_success(&self) -> bool {
        self.status == "auth_success"
    }

    /// Whether this marks a rejected credential.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.status == "auth_failed"
    }
}

/// One decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolygonMessage {
    /// Aggregate bar.
    Aggregate(AggregateMessage),
    /// Status notification.
    Status(StatusMessage),
    /// Any other `ev` value.
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn auth_request_wire_format() {
        let json = ActionRequest::auth("secret-key").to_json().unwrap();
        assert_eq!(json, r#"{"action":"auth","params":"secret-key"}"#);
    }

    #[test]
    fn subscribe_request_wire_format() {
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let json = ActionRequest::subscribe("AM", &symbols).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"action":"subscribe","params":["AM.AAPL","AM.MSFT"]}"#
        );
    }

    #[test]
    fn unsubscribe_uses_custom_prefix() {
        let request = ActionRequest::unsubscribe("A", &["TSLA".to_string()]);
        assert_eq!(request.action.as_str(), "unsubscribe");
        assert_eq!(request.params, ActionParams::Channels(vec!["A.TSLA".to_string()]));
    }

    #[test]
    fn aggregate_prefers_start_timestamp() {
        let msg: AggregateMessage = serde_json::from_str(
            r#"{"ev":"AM","sym":"AAPL","o":150,"h":152,"l":149,"c":151,"v":1000,"vw":150.5,"s":10,"e":20}"#,
        )
        .unwrap();

        let update = msg.into_update().unwrap();
        assert_eq!(update.timestamp, Some(10));
        assert_eq!(update.price, dec!(151));
        assert_eq!(update.vwap, Some(dec!(150.5)));
    }

    #[test]
    fn aggregate_falls_back_to_end_timestamp() {
        let msg: AggregateMessage = serde_json::from_str(
            r#"{"ev":"A","sym":"MSFT","o":1,"h":1,"l":1,"c":1,"v":1,"e":20}"#,
        )
        .unwrap();

        let update = msg.into_update().unwrap();
        assert_eq!(update.timestamp, Some(20));
        assert_eq!(update.event_type, EventType::Second);
        assert!(update.vwap.is_none());
    }

    #[test]
    fn aggregate_with_unrepresentable_change_has_no_update() {
        let msg: AggregateMessage = serde_json::from_str(
            r#"{"ev":"AM","sym":"WILD","o":-7e28,"h":7e28,"l":-7e28,"c":7e28,"v":1}"#,
        )
        .unwrap();

        assert!(msg.into_update().is_none());
    }

    #[test]
    fn status_markers() {
        let ok = StatusMessage {
            status: "auth_success".to_string(),
            message: "authenticated".to_string(),
        };
        assert!(ok.is_auth_success());
        assert!(!ok.is_auth_failure());

        let failed: StatusMessage =
            serde_json::from_str(r#"{"status":"auth_failed"}"#).unwrap();
        assert!(failed.is_auth_failure());
        assert!(failed.message.is_empty());
    }
}
