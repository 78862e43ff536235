/*
[INPUT]:  Raw diff-stream message text
[OUTPUT]: Typed DiffEvent or a Malformed error
[POS]:    WebSocket layer - stateless diff decoding and validation
[UPDATE]: When the stream payload format changes
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tracing::{debug, info};

use crate::http::{DepthError, Result};
use crate::types::{DepthUpdateMessage, DiffEvent};
use crate::ws::client::truncate_for_log;

const DECODE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static DECODE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Decode one stream message into a diff event.
///
/// Accepts the bare `depthUpdate` payload and the combined-stream envelope
/// `{"stream": "...", "data": {...}}`. Never panics on bad input; the caller
/// drops the message and keeps the stream running.
pub fn decode_diff(raw: &str) -> Result<DiffEvent> {
    decode_inner(raw).inspect_err(|err| log_decode_fail_once(err, raw))
}

fn decode_inner(raw: &str) -> Result<DiffEvent> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| DepthError::malformed(format!("invalid json: {err}")))?;

    let payload = match value {
        Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    let message: DepthUpdateMessage = serde_json::from_value(payload)
        .map_err(|err| DepthError::malformed(format!("not a depth update: {err}")))?;
    message.into_diff_event().map_err(DepthError::Malformed)
}

fn log_decode_fail_once(err: &DepthError, raw: &str) {
    let count = DECODE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < DECODE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = DECODE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message decode failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = DECODE_FAIL_LOG_LIMIT,
            error = %err,
            message = %preview,
            "ws message decode failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;
    use rstest::rstest;

    fn level(price: &str, quantity: &str) -> PriceLevel {
        PriceLevel::new(price.parse().expect("price"), quantity.parse().expect("qty"))
    }

    #[test]
    fn decodes_spot_depth_update() {
        let raw = r#"{
            "e": "depthUpdate", "E": 1672515782136, "s": "BNBBTC",
            "U": 157, "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "100"]]
        }"#;

        let event = decode_diff(raw).expect("decode");
        assert_eq!(event.symbol, "BNBBTC");
        assert_eq!(event.first_update_id, 157);
        assert_eq!(event.final_update_id, 160);
        assert_eq!(event.bid_changes, vec![level("0.0024", "10")]);
        assert_eq!(event.ask_changes, vec![level("0.0026", "100")]);
    }

    #[test]
    fn decodes_futures_update_with_previous_id() {
        let raw = r#"{
            "e": "depthUpdate", "E": 123456789, "T": 123456788, "s": "BTCUSDT",
            "U": 157, "u": 160, "pu": 149,
            "b": [["7403.89", "0.002"]], "a": [["7405.96", "3.340"]]
        }"#;

        let event = decode_diff(raw).expect("decode");
        assert_eq!(event.previous_final_update_id, Some(149));
    }

    #[test]
    fn decodes_combined_stream_envelope() {
        let raw = r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","s":"BTCUSDT","U":5,"u":6,"b":[],"a":[["1.5","0"]]}}"#;

        let event = decode_diff(raw).expect("decode");
        assert_eq!(event.first_update_id, 5);
        assert!(event.ask_changes[0].is_removal());
    }

    #[test]
    fn decodes_numeric_levels() {
        let raw = r#"{"U":101,"u":101,"b":[[50000,0],[49990,0.5]],"a":[]}"#;
        let event = decode_diff(raw).expect("decode");
        assert_eq!(
            event.bid_changes,
            vec![level("50000", "0"), level("49990", "0.5")]
        );
    }

    #[rstest]
    #[case::not_json("not json")]
    #[case::subscription_ack(r#"{"result":null,"id":1}"#)]
    #[case::wrong_event(r#"{"e":"trade","U":1,"u":1,"b":[],"a":[]}"#)]
    #[case::inverted_range(r#"{"U":9,"u":3,"b":[],"a":[]}"#)]
    #[case::bad_price(r#"{"U":1,"u":1,"b":[["abc","1"]],"a":[]}"#)]
    #[case::negative_qty(r#"{"U":1,"u":1,"b":[["10","-1"]],"a":[]}"#)]
    #[case::short_level(r#"{"U":1,"u":1,"b":[["10"]],"a":[]}"#)]
    fn rejects_malformed_input(#[case] raw: &str) {
        let err = decode_diff(raw).expect_err("malformed");
        assert!(matches!(err, DepthError::Malformed(_)), "got {err:?}");
    }
}
