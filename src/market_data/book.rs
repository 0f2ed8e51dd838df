// =============================================================================
// Book Snapshot - normalises order-book payloads to a single top of book
// =============================================================================
//
// The snapshot endpoint has been observed to answer in several shapes:
//
//   { "bids": [[px, sz], ...], "asks": [[px, sz], ...] }
//   { "levels": [[px, sz], ...] }                 (flat, straddling the mid)
//   { "levels": [[{px, sz, n}, ...], [{px, sz, n}, ...]] }   (bids, asks)
//   { "data": { ...any of the above... } }
//   [[px, sz], ...]                               (bare list)
//
// `BookSnapshot::from_json` resolves the shape once; everything downstream
// works on the two variants.
// =============================================================================

use serde_json::Value;

/// Order-book snapshot reduced to level prices.
#[derive(Debug, Clone, PartialEq)]
pub enum BookSnapshot {
    /// Unsided levels; sides are inferred relative to the mid price.
    Levels(Vec<f64>),
    /// Explicit bid and ask levels.
    BidAsk { bids: Vec<f64>, asks: Vec<f64> },
}

/// Best bid / ask extracted from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TopOfBook {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl BookSnapshot {
    /// Resolve any known payload shape. Returns `None` when nothing in the
    /// payload looks like a list of levels.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::from_array(items)),
            Value::Object(map) => {
                if let Some(levels) = map.get("levels") {
                    return Self::from_json(levels);
                }
                if let (Some(bids), Some(asks)) = (map.get("bids"), map.get("asks")) {
                    return Some(Self::BidAsk {
                        bids: level_prices(bids),
                        asks: level_prices(asks),
                    });
                }
                if let Some(data) = map.get("data") {
                    return Self::from_json(data);
                }
                map.values()
                    .find(|v| v.as_array().map(|a| !a.is_empty()).unwrap_or(false))
                    .and_then(Self::from_json)
            }
            _ => None,
        }
    }

    fn from_array(items: &[Value]) -> Self {
        // `[[level, ...], [level, ...]]` is a (bids, asks) pair when the inner
        // entries are themselves levels rather than scalars.
        let is_sided = items.len() == 2
            && items.iter().all(|side| {
                side.as_array()
                    .map(|levels| levels.iter().all(|l| l.is_array() || l.is_object()))
                    .unwrap_or(false)
            });

        if is_sided {
            Self::BidAsk {
                bids: level_prices(&items[0]),
                asks: level_prices(&items[1]),
            }
        } else {
            Self::Levels(items.iter().filter_map(level_price).collect())
        }
    }

    /// Best bid and ask.
    ///
    /// For explicit sides this is the highest bid and the lowest ask. For
    /// unsided levels the bid is the highest level strictly below `mid` and
    /// the ask the lowest level strictly above it.
    pub fn top_of_book(&self, mid: f64) -> TopOfBook {
        match self {
            Self::BidAsk { bids, asks } => TopOfBook {
                bid: bids.iter().copied().filter(|p| *p > 0.0).reduce(f64::max),
                ask: asks.iter().copied().filter(|p| *p > 0.0).reduce(f64::min),
            },
            Self::Levels(levels) => TopOfBook {
                bid: levels
                    .iter()
                    .copied()
                    .filter(|p| *p > 0.0 && *p < mid)
                    .reduce(f64::max),
                ask: levels.iter().copied().filter(|p| *p > mid).reduce(f64::min),
            },
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Levels(levels) => levels.is_empty(),
            Self::BidAsk { bids, asks } => bids.is_empty() && asks.is_empty(),
        }
    }
}

fn level_prices(side: &Value) -> Vec<f64> {
    side.as_array()
        .map(|levels| levels.iter().filter_map(level_price).collect())
        .unwrap_or_default()
}

/// Price of a single level: `[px, sz]`, `{"px": ..}`, `{"price": ..}` or a
/// bare scalar.
fn level_price(level: &Value) -> Option<f64> {
    match level {
        Value::Array(parts) => parts.first().and_then(parse_num),
        Value::Object(map) => map.get("px").or_else(|| map.get("price")).and_then(parse_num),
        other => parse_num(other),
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub fn parse_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn top(value: Value, mid: f64) -> TopOfBook {
        BookSnapshot::from_json(&value)
            .expect("shape should be recognised")
            .top_of_book(mid)
    }

    #[test]
    fn explicit_bids_and_asks() {
        let t = top(json!({ "bids": [[99, 1]], "asks": [[101, 1]] }), 100.0);
        assert_eq!(t, TopOfBook { bid: Some(99.0), ask: Some(101.0) });
    }

    #[test]
    fn flat_levels_straddling_mid() {
        let t = top(json!({ "levels": [[99, 1], [101, 1]] }), 100.0);
        assert_eq!(t, TopOfBook { bid: Some(99.0), ask: Some(101.0) });

        let bare = top(json!([99, 101]), 100.0);
        assert_eq!(bare, TopOfBook { bid: Some(99.0), ask: Some(101.0) });
    }

    #[test]
    fn nested_under_data() {
        let t = top(
            json!({ "data": { "bids": [[99, 1]], "asks": [[101, 1]] } }),
            100.0,
        );
        assert_eq!(t, TopOfBook { bid: Some(99.0), ask: Some(101.0) });
    }

    #[test]
    fn venue_l2_book_shape_with_string_prices() {
        let payload = json!({
            "coin": "BTC",
            "time": 1_700_000_000_000u64,
            "levels": [
                [{ "px": "98.5", "sz": "2", "n": 1 }, { "px": "99", "sz": "1", "n": 3 }],
                [{ "px": "101", "sz": "1", "n": 2 }, { "px": "102.5", "sz": "4", "n": 1 }]
            ]
        });
        let snapshot = BookSnapshot::from_json(&payload).unwrap();
        assert!(matches!(snapshot, BookSnapshot::BidAsk { .. }));
        assert_eq!(
            snapshot.top_of_book(100.0),
            TopOfBook { bid: Some(99.0), ask: Some(101.0) }
        );
    }

    #[test]
    fn flat_levels_pick_closest_on_each_side() {
        let t = top(json!([[97, 1], [99.5, 1], [100, 1], [100.5, 2], [103, 1]]), 100.0);
        assert_eq!(t, TopOfBook { bid: Some(99.5), ask: Some(100.5) });
    }

    #[test]
    fn one_sided_levels_leave_other_side_missing() {
        let t = top(json!({ "levels": [[98, 1], [99, 1]] }), 100.0);
        assert_eq!(t, TopOfBook { bid: Some(99.0), ask: None });
    }

    #[test]
    fn unknown_key_with_list_is_treated_as_levels() {
        let t = top(json!({ "book": [[99, 1], [101, 1]] }), 100.0);
        assert_eq!(t, TopOfBook { bid: Some(99.0), ask: Some(101.0) });
    }

    #[test]
    fn unusable_payloads() {
        assert!(BookSnapshot::from_json(&json!(null)).is_none());
        assert!(BookSnapshot::from_json(&json!({ "status": "ok" })).is_none());
        let empty = BookSnapshot::from_json(&json!({ "levels": [] })).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.top_of_book(100.0), TopOfBook::default());
    }
}
