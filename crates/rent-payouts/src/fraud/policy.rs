use super::{FraudAssessment, FraudPattern, PatternType, RiskLevel};

pub const CRITICAL_SCORE: u8 = 90;
pub const HIGH_SCORE: u8 = 75;
pub const MEDIUM_SCORE: u8 = 40;
/// Scores at or above this hold the disbursement for an operator.
pub const APPROVAL_SCORE: u8 = 60;

pub(super) const MANUAL_REVIEW: &str = "Manual review required: automatic evaluation failed";
const PROCEED: &str = "Proceed automatically";

pub(super) fn level_for(score: u8) -> RiskLevel {
    match score {
        s if s >= CRITICAL_SCORE => RiskLevel::Critical,
        s if s >= HIGH_SCORE => RiskLevel::High,
        s if s >= MEDIUM_SCORE => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn advice_for(pattern_type: PatternType) -> &'static str {
    match pattern_type {
        PatternType::Velocity => "Review the recipient's transaction frequency",
        PatternType::Amount => "Confirm the source of funds with the recipient",
        PatternType::Location => "Verify the recipient's location",
        PatternType::Device => "Require additional authentication for the device",
        PatternType::Behavior => "Compare against the recipient's usual activity",
        PatternType::Network => "Investigate the originating network",
    }
}

fn advice_for_level(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => "Block the transaction and open an investigation",
        RiskLevel::High => "Require immediate manual approval",
        RiskLevel::Medium => "Monitor closely and consider manual approval",
        RiskLevel::Low => "Proceed with standard monitoring",
    }
}

fn fired_types(patterns: &[FraudPattern]) -> Vec<PatternType> {
    PatternType::ALL
        .into_iter()
        .filter(|kind| patterns.iter().any(|p| p.pattern_type == *kind))
        .collect()
}

pub(super) fn decide(patterns: Vec<FraudPattern>) -> FraudAssessment {
    if patterns.is_empty() {
        return FraudAssessment {
            risk_level: RiskLevel::Low,
            risk_score: 0,
            confidence: 1.0,
            patterns,
            recommendations: vec![PROCEED.to_string()],
            requires_approval: false,
            block_transaction: false,
            flags: Vec::new(),
        };
    }

    let total: u32 = patterns.iter().map(|p| u32::from(p.risk_score)).sum();
    let risk_score = total.min(100) as u8;
    let risk_level = level_for(risk_score);
    let confidence =
        patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64;

    let fired = fired_types(&patterns);
    let mut recommendations: Vec<String> =
        fired.iter().map(|kind| advice_for(*kind).to_string()).collect();
    recommendations.push(advice_for_level(risk_level).to_string());

    let mut flags: Vec<String> = fired.iter().map(|kind| kind.label().to_string()).collect();
    if patterns.iter().any(|p| p.risk_score >= 30) {
        flags.push("high_risk_pattern".to_string());
    }
    if patterns.len() >= 3 {
        flags.push("multiple_patterns".to_string());
    }
    if patterns.iter().any(|p| p.confidence >= 0.8) {
        flags.push("high_confidence".to_string());
    }

    FraudAssessment {
        risk_level,
        risk_score,
        confidence,
        patterns,
        recommendations,
        requires_approval: risk_score >= APPROVAL_SCORE,
        block_transaction: risk_level == RiskLevel::Critical,
        flags,
    }
}
