use serde::Serialize;

/// Raw counts gathered for a reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetrics {
    pub active_contracts: i64,
    pub revoked_contracts: i64,
    pub expired_contracts: i64,
    pub pending_requests: i64,
    pub overdue_requests: i64,
    pub expired_requests: i64,
    pub audit_events: i64,
    pub audit_failures: i64,
    pub inactive_users: i64,
    pub active_users: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceScore {
    pub score: u32,
    pub rating: &'static str,
    pub findings: Vec<String>,
}

/// Start at 100 and subtract fixed penalties.
///
/// - pending requests already past their expiry: 5 each, at most 25
/// - audit failure rate above 5%: 20, above 1%: 10
/// - more than 20% of accounts dormant for 90 days: 10
/// - no audit events at all in the window: 15
pub fn score(m: &ComplianceMetrics) -> ComplianceScore {
    let mut score: i64 = 100;
    let mut findings = Vec::new();

    if m.overdue_requests > 0 {
        score -= (m.overdue_requests * 5).min(25);
        findings.push(format!(
            "{} pending consent request(s) are past their expiry",
            m.overdue_requests
        ));
    }

    if m.audit_events == 0 {
        score -= 15;
        findings.push("No audit events recorded in the reporting window".to_string());
    } else {
        let failure_rate = m.audit_failures as f64 / m.audit_events as f64;
        if failure_rate > 0.05 {
            score -= 20;
            findings.push(format!("Audit failure rate {:.1}% exceeds 5%", failure_rate * 100.0));
        } else if failure_rate > 0.01 {
            score -= 10;
            findings.push(format!("Audit failure rate {:.1}% exceeds 1%", failure_rate * 100.0));
        }
    }

    let total_users = m.active_users + m.inactive_users;
    if total_users > 0 && m.inactive_users * 5 > total_users {
        score -= 10;
        findings.push(format!("{} of {} accounts have been dormant for 90 days", m.inactive_users, total_users));
    }

    let score = score.clamp(0, 100) as u32;
    ComplianceScore {
        score,
        rating: rating(score),
        findings,
    }
}

pub fn rating(score: u32) -> &'static str {
    match score {
        90.. => "excellent",
        75..=89 => "good",
        60..=74 => "fair",
        _ => "poor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn healthy() -> ComplianceMetrics {
        ComplianceMetrics {
            active_contracts: 12,
            audit_events: 1000,
            audit_failures: 2,
            active_users: 40,
            inactive_users: 2,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_system_scores_full() {
        let s = score(&healthy());
        assert_eq!(s.score, 100);
        assert_eq!(s.rating, "excellent");
        assert!(s.findings.is_empty());
    }

    #[test]
    fn overdue_penalty_is_capped() {
        let m = ComplianceMetrics { overdue_requests: 40, ..healthy() };
        assert_eq!(score(&m).score, 75);
    }

    #[test]
    fn silent_audit_log_is_penalized() {
        let m = ComplianceMetrics { audit_events: 0, audit_failures: 0, ..healthy() };
        let s = score(&m);
        assert_eq!(s.score, 85);
        assert_eq!(s.findings.len(), 1);
    }

    #[test]
    fn failure_rate_bands() {
        let high = ComplianceMetrics { audit_failures: 100, ..healthy() };
        let moderate = ComplianceMetrics { audit_failures: 20, ..healthy() };
        assert_eq!(score(&high).score, 80);
        assert_eq!(score(&moderate).score, 90);
    }

    #[test_case(100, "excellent")]
    #[test_case(90, "excellent")]
    #[test_case(89, "good")]
    #[test_case(75, "good")]
    #[test_case(60, "fair")]
    #[test_case(59, "poor")]
    fn rating_bands(s: u32, expected: &str) {
        assert_eq!(rating(s), expected);
    }
}
