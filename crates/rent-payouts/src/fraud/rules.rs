use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Thresholds consulted by the detectors. Every field has a production default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudRules {
    pub hourly_count_limit: usize,
    pub daily_count_limit: usize,
    pub hourly_amount_limit: Decimal,

    pub average_multiplier: Decimal,
    pub round_amount_floor: Decimal,
    pub round_amount_step: Decimal,
    pub probe_amounts: Vec<Decimal>,

    pub high_risk_countries: Vec<String>,
    pub country_spread_limit: usize,

    pub suspicious_agents: Vec<String>,
    pub device_spread_limit: usize,

    pub burst_multiplier: Decimal,
    pub burst_minimum: usize,
    /// Inclusive local-hour window considered unusual for payouts.
    pub quiet_hours: (u32, u32),
    pub utc_offset_hours: i32,
    pub test_amounts: Vec<Decimal>,
    pub test_keywords: Vec<String>,

    pub denied_ips: Vec<String>,
}

impl Default for FraudRules {
    fn default() -> Self {
        Self {
            hourly_count_limit: 5,
            daily_count_limit: 20,
            hourly_amount_limit: Decimal::from(5_000_000),

            average_multiplier: Decimal::from(5),
            round_amount_floor: Decimal::from(1_000_000),
            round_amount_step: Decimal::from(100_000),
            probe_amounts: [1_000, 10_000, 100_000].map(Decimal::from).to_vec(),

            high_risk_countries: ["KP", "IR", "CU", "SY", "VE"].map(String::from).to_vec(),
            country_spread_limit: 3,

            suspicious_agents: ["bot", "crawler"].map(String::from).to_vec(),
            device_spread_limit: 3,

            burst_multiplier: Decimal::from(3),
            burst_minimum: 3,
            quiet_hours: (2, 6),
            utc_offset_hours: -4,
            test_amounts: [1, 100, 1_000, 10_000, 999, 9_999].map(Decimal::from).to_vec(),
            test_keywords: ["test", "prueba", "demo", "sample"].map(String::from).to_vec(),

            denied_ips: Vec::new(),
        }
    }
}

impl FraudRules {
    pub fn is_high_risk_country(&self, country: &str) -> bool {
        self.high_risk_countries
            .iter()
            .any(|listed| listed.eq_ignore_ascii_case(country.trim()))
    }

    pub fn is_denied_ip(&self, ip: &str) -> bool {
        self.denied_ips.iter().any(|denied| denied == ip.trim())
    }

    pub fn is_quiet_hour(&self, hour: u32) -> bool {
        let (start, end) = self.quiet_hours;
        (start..=end).contains(&hour)
    }
}
