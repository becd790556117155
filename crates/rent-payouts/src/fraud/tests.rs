use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::*;

fn afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 2, 15, 0, 0).unwrap()
}

fn payout(amount: Decimal) -> TransactionData {
    TransactionData::payout("owner-1", amount, "CLP", afternoon())
}

fn denied_ip_rules() -> FraudRules {
    FraudRules {
        denied_ips: vec!["198.51.100.7".to_string()],
        ..FraudRules::default()
    }
}

#[test]
fn clean_payout_proceeds_automatically() {
    let assessment = FraudAssessor::default().assess_transaction(&payout(dec!(470000)));

    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert_eq!(assessment.risk_score, 0);
    assert_eq!(assessment.confidence, 1.0);
    assert!(assessment.patterns.is_empty());
    assert!(assessment.flags.is_empty());
    assert_eq!(assessment.recommendations, vec!["Proceed automatically"]);
    assert!(!assessment.requires_approval);
    assert!(!assessment.block_transaction);
}

#[test]
fn deny_listed_ip_with_foreign_location_is_critical() {
    let mut tx = payout(dec!(470000));
    tx.metadata.ip_address = Some("198.51.100.7".to_string());
    tx.metadata.location = Some(Location {
        country: "IR".to_string(),
        city: None,
    });
    tx.profile.known_countries = vec!["CL".to_string()];
    tx.metadata.user_agent = Some("Mozilla/5.0".to_string());

    let assessment = FraudAssessor::new(denied_ip_rules()).assess_transaction(&tx);

    // 45 (deny list) + 40 (high-risk country) + 25 (new country), capped at 100
    assert_eq!(assessment.risk_score, 100);
    assert_eq!(assessment.risk_level, RiskLevel::Critical);
    assert!(assessment.block_transaction);
    assert!(assessment.requires_approval);
}

#[test]
fn ninety_five_points_block_the_transfer() {
    // 45 (deny list) + 40 (high-risk country) + 10 (round amount)
    let mut tx = payout(dec!(2000000));
    tx.metadata.ip_address = Some("198.51.100.7".to_string());
    tx.metadata.location = Some(Location {
        country: "CU".to_string(),
        city: None,
    });

    let assessment = FraudAssessor::new(denied_ip_rules()).assess_transaction(&tx);

    assert_eq!(assessment.risk_score, 95);
    assert_eq!(assessment.risk_level, RiskLevel::Critical);
    assert!(assessment.block_transaction);
    assert_eq!(
        assessment.flags,
        vec!["amount", "location", "network", "high_risk_pattern", "multiple_patterns", "high_confidence"]
    );
    assert_eq!(
        assessment.recommendations.last().map(String::as_str),
        Some("Block the transaction and open an investigation")
    );
}

#[test]
fn medium_risk_below_approval_score_proceeds_with_monitoring() {
    let mut tx = payout(dec!(470000));
    tx.metadata.location = Some(Location {
        country: "VE".to_string(),
        city: Some("Maracaibo".to_string()),
    });

    let assessment = FraudAssessor::default().assess_transaction(&tx);

    assert_eq!(assessment.risk_score, 40);
    assert_eq!(assessment.risk_level, RiskLevel::Medium);
    assert!(!assessment.requires_approval);
    assert!(!assessment.block_transaction);
    assert_eq!(
        assessment.recommendations,
        vec![
            "Verify the recipient's location",
            "Monitor closely and consider manual approval"
        ]
    );
    assert_eq!(assessment.flags, vec!["location", "high_risk_pattern", "high_confidence"]);
}

#[test]
fn approval_required_from_sixty_without_blocking() {
    let mut tx = payout(dec!(470000));
    tx.metadata.user_agent = Some("python-crawler/1.0".to_string());
    tx.metadata.proxy_detected = true;
    tx.metadata.device_fingerprint = Some("fp-unknown".to_string());
    tx.profile.known_devices = vec!["fp-laptop".to_string()];

    let assessment = FraudAssessor::default().assess_transaction(&tx);

    // 20 (unknown device) + 35 (crawler) + 20 (proxy)
    assert_eq!(assessment.risk_score, 75);
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert!(assessment.requires_approval);
    assert!(!assessment.block_transaction);
    let expected_confidence = (0.8 + 0.9 + 0.7) / 3.0;
    assert!((assessment.confidence - expected_confidence).abs() < 1e-9);
}

#[test]
fn malformed_amount_fails_open() {
    let assessment = FraudAssessor::default().assess_transaction(&payout(dec!(-5)));

    assert_eq!(assessment, FraudAssessment::fail_open());
    assert_eq!(assessment.risk_level, RiskLevel::Medium);
    assert_eq!(assessment.risk_score, 50);
    assert!(assessment.requires_approval);
    assert!(!assessment.block_transaction);
    assert_eq!(assessment.flags, vec!["evaluation_error"]);
}

#[test]
fn same_input_same_verdict() {
    let mut tx = payout(dec!(1500000));
    tx.history = (1..=4)
        .map(|hours| HistoricalTransaction {
            amount: dec!(120000),
            timestamp: afternoon() - Duration::hours(hours),
            country: Some("CL".to_string()),
            device_fingerprint: None,
        })
        .collect();

    let assessor = FraudAssessor::default();
    let first = assessor.assess_transaction(&tx);
    let second = assessor.assess_transaction(&tx);

    assert_eq!(first, second);
    assert!(first.risk_score <= 100);
}

#[test]
fn summary_lists_fired_detectors() {
    let mut tx = payout(dec!(100000));
    tx.metadata.proxy_detected = true;

    let assessment = FraudAssessor::default().assess_transaction(&tx);

    assert_eq!(assessment.summary(), "low risk (score 35): amount, network");
}
