use std::collections::BTreeSet;

use chrono::{Duration, Timelike};
use rust_decimal::Decimal;
use serde_json::json;

use super::{FraudPattern, FraudRules, HistoricalTransaction, PatternType, TransactionData};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    #[error("malformed transaction: {0}")]
    Malformed(String),
}

type Detection = Result<Vec<FraudPattern>, DetectorError>;

fn pattern(
    pattern_type: PatternType,
    risk_score: u8,
    confidence: f64,
    description: String,
    metadata: serde_json::Value,
) -> FraudPattern {
    FraudPattern {
        pattern_type,
        risk_score,
        confidence,
        description,
        metadata,
    }
}

/// Patterns from every detector, in detector order.
pub(super) fn run_all(rules: &FraudRules, tx: &TransactionData) -> Detection {
    if tx.amount <= Decimal::ZERO {
        return Err(DetectorError::Malformed(format!(
            "amount must be positive, got {}",
            tx.amount
        )));
    }

    let mut patterns = Vec::new();
    for detector in [velocity, amount, location, device, behavior, network] {
        patterns.extend(detector(rules, tx)?);
    }
    Ok(patterns)
}

fn within<'a>(
    tx: &'a TransactionData,
    window: Duration,
) -> impl Iterator<Item = &'a HistoricalTransaction> + 'a {
    let since = tx.occurred_at - window;
    tx.history
        .iter()
        .filter(move |past| past.timestamp > since && past.timestamp <= tx.occurred_at)
}

fn velocity(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();
    let last_hour: Vec<&HistoricalTransaction> = within(tx, Duration::hours(1)).collect();
    let last_day = within(tx, Duration::hours(24)).count();

    if last_hour.len() > rules.hourly_count_limit {
        found.push(pattern(
            PatternType::Velocity,
            25,
            0.8,
            format!("{} transactions in the last hour", last_hour.len()),
            json!({ "transaction_count": last_hour.len(), "window": "1h" }),
        ));
    }
    if last_day > rules.daily_count_limit {
        found.push(pattern(
            PatternType::Velocity,
            15,
            0.7,
            format!("{last_day} transactions in the last 24 hours"),
            json!({ "transaction_count": last_day, "window": "24h" }),
        ));
    }

    let hourly_total: Decimal = last_hour.iter().map(|past| past.amount).sum();
    if hourly_total > rules.hourly_amount_limit {
        found.push(pattern(
            PatternType::Velocity,
            35,
            0.9,
            format!("{hourly_total} moved in the last hour"),
            json!({ "total_amount": hourly_total.to_string(), "window": "1h" }),
        ));
    }
    Ok(found)
}

fn amount(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();
    let value = tx.amount;

    if !tx.history.is_empty() {
        let total: Decimal = tx.history.iter().map(|past| past.amount).sum();
        let average = total / Decimal::from(tx.history.len());
        if average > Decimal::ZERO && value > average * rules.average_multiplier {
            found.push(pattern(
                PatternType::Amount,
                20,
                0.75,
                format!("amount {value} against an average of {}", average.round_dp(0)),
                json!({
                    "amount": value.to_string(),
                    "average_amount": average.round_dp(2).to_string(),
                }),
            ));
        }
    }

    if value >= rules.round_amount_floor
        && !rules.round_amount_step.is_zero()
        && (value % rules.round_amount_step).is_zero()
    {
        found.push(pattern(
            PatternType::Amount,
            10,
            0.6,
            format!("large round amount {value}"),
            json!({ "amount": value.to_string() }),
        ));
    }

    if rules.probe_amounts.contains(&value) {
        found.push(pattern(
            PatternType::Amount,
            15,
            0.8,
            format!("probe amount {value}"),
            json!({ "amount": value.to_string() }),
        ));
    }
    Ok(found)
}

fn location(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();

    if let Some(place) = &tx.metadata.location {
        let country = place.country.trim().to_ascii_uppercase();
        if rules.is_high_risk_country(&country) {
            found.push(pattern(
                PatternType::Location,
                40,
                0.9,
                format!("high-risk country {country}"),
                json!({ "country": country }),
            ));
        }

        let known = &tx.profile.known_countries;
        if !known.is_empty() && !known.iter().any(|c| c.eq_ignore_ascii_case(&country)) {
            found.push(pattern(
                PatternType::Location,
                25,
                0.7,
                format!("country {country} not seen for this user"),
                json!({ "country": country, "city": place.city }),
            ));
        }
    }

    let countries: BTreeSet<String> = within(tx, Duration::hours(24))
        .filter_map(|past| past.country.as_deref())
        .map(|country| country.trim().to_ascii_uppercase())
        .collect();
    if countries.len() >= rules.country_spread_limit {
        found.push(pattern(
            PatternType::Location,
            30,
            0.75,
            format!("{} countries in the last 24 hours", countries.len()),
            json!({ "countries": countries }),
        ));
    }
    Ok(found)
}

fn device(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();
    let metadata = &tx.metadata;

    if let Some(fingerprint) = &metadata.device_fingerprint {
        let known = &tx.profile.known_devices;
        if !known.is_empty() && !known.contains(fingerprint) {
            found.push(pattern(
                PatternType::Device,
                20,
                0.8,
                "unrecognized device".to_string(),
                json!({ "device_fingerprint": fingerprint }),
            ));
        }
    }

    if let Some(agent) = &metadata.user_agent {
        let lowered = agent.to_ascii_lowercase();
        if rules
            .suspicious_agents
            .iter()
            .any(|marker| lowered.contains(&marker.to_ascii_lowercase()))
        {
            found.push(pattern(
                PatternType::Device,
                35,
                0.9,
                "automated user agent".to_string(),
                json!({ "user_agent": agent }),
            ));
        }
    }

    let devices: BTreeSet<&str> = within(tx, Duration::hours(24))
        .filter_map(|past| past.device_fingerprint.as_deref())
        .collect();
    if devices.len() >= rules.device_spread_limit {
        found.push(pattern(
            PatternType::Device,
            25,
            0.7,
            format!("{} devices in the last 24 hours", devices.len()),
            json!({ "device_count": devices.len() }),
        ));
    }
    Ok(found)
}

fn behavior(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();

    let last_day = within(tx, Duration::hours(24)).count();
    let last_month = within(tx, Duration::days(30)).count();
    let daily_average = Decimal::from(last_month) / Decimal::from(30);
    if last_day >= rules.burst_minimum
        && Decimal::from(last_day) >= daily_average * rules.burst_multiplier
    {
        found.push(pattern(
            PatternType::Behavior,
            20,
            0.65,
            format!("{last_day} transactions today against a daily average of {}", daily_average.round_dp(2)),
            json!({ "change": "frequency_increase", "last_24h": last_day }),
        ));
    }

    let local = tx.occurred_at + Duration::hours(i64::from(rules.utc_offset_hours));
    if rules.is_quiet_hour(local.hour()) {
        found.push(pattern(
            PatternType::Behavior,
            15,
            0.6,
            format!("requested at {:02}:{:02} local time", local.hour(), local.minute()),
            json!({ "local_hour": local.hour() }),
        ));
    }

    let description = tx
        .description
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let test_amount = rules.test_amounts.contains(&tx.amount);
    let test_wording = rules
        .test_keywords
        .iter()
        .any(|keyword| description.contains(keyword.as_str()));
    if test_amount || test_wording {
        found.push(pattern(
            PatternType::Behavior,
            25,
            0.8,
            "looks like a system test".to_string(),
            json!({ "test_amount": test_amount, "test_description": test_wording }),
        ));
    }
    Ok(found)
}

fn network(rules: &FraudRules, tx: &TransactionData) -> Detection {
    let mut found = Vec::new();
    let metadata = &tx.metadata;

    if let Some(ip) = &metadata.ip_address {
        if rules.is_denied_ip(ip) {
            found.push(pattern(
                PatternType::Network,
                45,
                0.95,
                "IP address on the deny list".to_string(),
                json!({ "ip_address": ip }),
            ));
        }
    }

    if metadata.proxy_detected {
        found.push(pattern(
            PatternType::Network,
            20,
            0.7,
            "request came through a proxy or VPN".to_string(),
            json!({ "ip_address": metadata.ip_address }),
        ));
    }

    if let (Some(ip_country), Some(place)) = (&metadata.ip_country, &metadata.location) {
        if !ip_country.trim().eq_ignore_ascii_case(place.country.trim()) {
            found.push(pattern(
                PatternType::Network,
                25,
                0.75,
                format!("IP located in {ip_country}, user in {}", place.country),
                json!({ "ip_country": ip_country, "expected_country": place.country }),
            ));
        }
    }
    Ok(found)
}
