//! Prompt construction and response validation shared by all providers.
//!
//! The model's answer is untrusted: `parse_analysis` is the only way raw
//! model text becomes an `ExternalAnalysisResult`, and it rejects anything
//! that is not the expected shape.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::types::{AnalyzedSignal, Anomaly, ExternalAnalysisResult, LongShortRatio, ScanError, ScanParameters};

/// System prompt for anomaly enrichment.
pub fn system_prompt() -> &'static str {
    "You are an expert crypto derivatives market analyst. You receive filtered, \
     live 24h snapshots of anomalous Binance USDT-margined perpetual contracts and \
     enrich them as structured JSON.\n\n\
     CRITICAL RULES:\n\
     1. Only analyse symbols from the provided list. Never add a symbol that is not \
        in the list and never rename one: if you are given 'BTCUSDT', return 'BTCUSDT'.\n\
     2. Respond with a single JSON object matching the requested schema. No prose, \
        no Markdown.\n\
     3. 'signal' is \"PUMP\" for a positive price change and \"DUMP\" for a negative one.\n\
     4. 'significance' is an integer: 1 (low), 2 (medium) or 3 (high)."
}

/// Build the user prompt for a batch of anomalies.
pub fn build_analysis_prompt(anomalies: &[Anomaly], params: &ScanParameters) -> String {
    let rows: Vec<Value> = anomalies
        .iter()
        .map(|a| {
            json!({
                "symbol": a.symbol(),
                "priceChangePercent": a.price_change_pct(),
                "quoteVolume": a.quote_volume_usd(),
            })
        })
        .collect();
    let data = serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string());

    let mut prompt = String::with_capacity(1500 + data.len());

    prompt.push_str(&format!("LIVE DATA ({} anomalies):\n{data}\n\n", anomalies.len()));
    prompt.push_str("ANALYSIS PARAMETERS:\n");
    prompt.push_str(&format!("- Chart interval: {} minutes\n", params.chart_interval_min));
    prompt.push_str(&format!("- Lookback: {} candles\n", params.lookback_candles));
    prompt.push_str(&format!("- Pump threshold: +{}%\n", params.price_change_threshold_pct));
    prompt.push_str(&format!("- Dump threshold: -{}%\n", params.price_change_threshold_pct));
    prompt.push_str(&format!("- Volume multiplier: {}x\n", params.volume_multiplier));

    prompt.push_str(
        "\nTASK:\n\
         1. Estimate a market-wide 'longShortRatio' ({long, short}, percentages) from the data.\n\
         2. For EACH anomaly return an entry in 'signals' with:\n\
         \x20  - 'symbol': the original symbol, UNCHANGED.\n\
         \x20  - 'signal': \"PUMP\" or \"DUMP\" from the sign of priceChangePercent.\n\
         \x20  - 'score': signal strength from priceChangePercent and quoteVolume; large moves \
         on high volume score higher.\n\
         \x20  - 'long_short_ratio': a coin-specific {long, short} estimate consistent with the signal.\n\
         \x20  - 'funding_rate', 'oi_change', 'price_change_intervals': realistic estimates \
         consistent with the 24h data; interval objects use keys 5m, 15m, 1h, 4h, 8h, 24h.\n\
         \x20  - 'significance': 1, 2 or 3 from the magnitude of funding rate and short-term \
         OI change; high funding with high OI change is 3.\n\
         3. Return a single JSON object: {\"longShortRatio\": {...}, \"signals\": [...]}.\n",
    );

    prompt
}

/// JSON schema for providers that support constrained output (Gemini
/// `responseSchema` dialect).
pub fn response_schema() -> Value {
    let ratio = json!({
        "type": "OBJECT",
        "properties": { "long": { "type": "NUMBER" }, "short": { "type": "NUMBER" } },
        "required": ["long", "short"],
    });
    let intervals = json!({
        "type": "OBJECT",
        "properties": {
            "5m": { "type": "NUMBER" }, "15m": { "type": "NUMBER" }, "1h": { "type": "NUMBER" },
            "4h": { "type": "NUMBER" }, "8h": { "type": "NUMBER" }, "24h": { "type": "NUMBER" },
        },
        "required": ["5m", "15m", "1h", "4h", "8h", "24h"],
    });

    json!({
        "type": "OBJECT",
        "properties": {
            "longShortRatio": ratio,
            "signals": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "symbol": { "type": "STRING" },
                        "signal": { "type": "STRING", "enum": ["PUMP", "DUMP"] },
                        "score": { "type": "NUMBER" },
                        "long_short_ratio": ratio,
                        "funding_rate": { "type": "NUMBER" },
                        "oi_change": intervals,
                        "price_change_intervals": intervals,
                        "significance": { "type": "INTEGER" },
                    },
                    "required": [
                        "symbol", "signal", "score", "long_short_ratio", "funding_rate",
                        "oi_change", "price_change_intervals", "significance"
                    ],
                },
            },
        },
        "required": ["longShortRatio", "signals"],
    })
}

// ---------------------------------------------------------------------------
// Response validation
// ---------------------------------------------------------------------------

/// Top-level shape. Entries stay untyped until validated one by one.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(rename = "longShortRatio", alias = "long_short_ratio")]
    long_short_ratio: LongShortRatio,
    signals: Vec<Value>,
}

/// Parse model output into a typed analysis result.
///
/// Fails with `ScanError::Enrichment` if the text is not a JSON object with
/// `longShortRatio` and a `signals` array. Individual malformed entries are
/// discarded with a warning, which downstream is indistinguishable from the
/// model omitting that symbol.
pub fn parse_analysis(text: &str) -> Result<ExternalAnalysisResult, ScanError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ScanError::Enrichment("Empty analysis response".into()));
    }

    let raw: RawAnalysis = serde_json::from_str(body).map_err(|e| {
        ScanError::Enrichment(format!("Analysis response does not match the expected shape: {e}"))
    })?;

    if !raw.long_short_ratio.long.is_finite() || !raw.long_short_ratio.short.is_finite() {
        return Err(ScanError::Enrichment("Market-wide long/short ratio is not finite".into()));
    }

    let total = raw.signals.len();
    let mut signals = Vec::with_capacity(total);

    for (index, value) in raw.signals.into_iter().enumerate() {
        match serde_json::from_value::<AnalyzedSignal>(value) {
            Ok(entry) if is_well_formed(&entry) => signals.push(entry),
            Ok(entry) => {
                warn!(index, symbol = %entry.symbol, "Discarding analysis entry with out-of-range fields");
            }
            Err(e) => {
                warn!(index, error = %e, "Discarding malformed analysis entry");
            }
        }
    }

    Ok(ExternalAnalysisResult {
        long_short_ratio: raw.long_short_ratio,
        signals,
    })
}

fn is_well_formed(entry: &AnalyzedSignal) -> bool {
    !entry.symbol.trim().is_empty()
        && (1..=3).contains(&entry.significance)
        && entry.score.is_finite()
        && entry.funding_rate.is_finite()
        && entry.long_short_ratio.long.is_finite()
        && entry.long_short_ratio.short.is_finite()
        && entry.oi_change.is_finite()
        && entry.price_change_intervals.is_finite()
}

/// Models sometimes wrap JSON in a Markdown fence despite instructions.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line, or directly
    // ahead of the body on a single-line fence.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
