//! Geolocation evaluator: haversine containment plus anomaly detection over
//! a student's own marking history.
//!
//! Anomalies are advisory. They raise `anomaly_events` rows and force the
//! flagged bit, but they never block the attendance write.

use chrono::{DateTime, Utc};
use db::models::anomaly_event::{AnomalyType, Severity};
use db::models::attendance_record::{Column as RecordCol, Entity as RecordEntity};
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Speeds above these thresholds (m/s) are physically implausible between
/// consecutive lecture check-ins.
pub const VELOCITY_LOW_MPS: f64 = 10.0;
pub const VELOCITY_MEDIUM_MPS: f64 = 40.0;
pub const VELOCITY_HIGH_MPS: f64 = 100.0;

/// Pairs closer together than this are same-session retry noise, not travel.
pub const MIN_VELOCITY_GAP_SECS: i64 = 60;

/// Number of historical records the jump detector looks at.
pub const JUMP_HISTORY_LEN: u64 = 10;

/// Median displacement beyond this (meters) looks like location spoofing.
pub const JUMP_MEDIAN_M: f64 = 50_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityCheck {
    pub within: bool,
    pub distance_m: f64,
}

#[derive(Debug, Clone)]
pub struct AnomalyFinding {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub detail: String,
}

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Containment check against a session's campus geofence.
pub fn within_radius(
    lat: f64,
    lng: f64,
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
) -> ProximityCheck {
    let distance_m = haversine_m(lat, lng, center_lat, center_lng);
    ProximityCheck {
        within: distance_m <= radius_m,
        distance_m,
    }
}

fn velocity_finding(distance_m: f64, gap_secs: i64) -> Option<AnomalyFinding> {
    if gap_secs < MIN_VELOCITY_GAP_SECS {
        return None;
    }
    let velocity = distance_m / gap_secs as f64;
    let severity = if velocity > VELOCITY_HIGH_MPS {
        Severity::High
    } else if velocity > VELOCITY_MEDIUM_MPS {
        Severity::Medium
    } else if velocity > VELOCITY_LOW_MPS {
        Severity::Low
    } else {
        return None;
    };
    Some(AnomalyFinding {
        anomaly_type: AnomalyType::Velocity,
        severity,
        detail: format!(
            "{:.1} m/s over {:.0} m in {} s",
            velocity, distance_m, gap_secs
        ),
    })
}

fn jump_finding(median_m: f64) -> Option<AnomalyFinding> {
    if median_m > JUMP_MEDIAN_M {
        Some(AnomalyFinding {
            anomaly_type: AnomalyType::LocationJump,
            severity: Severity::High,
            detail: format!("median displacement {:.0} m over recent history", median_m),
        })
    } else {
        None
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Runs velocity and jump-pattern checks against the student's record history
/// across all sessions. Findings are returned for the caller to persist; the
/// checks themselves never fail the mark.
pub async fn evaluate_history(
    db: &sea_orm::DatabaseConnection,
    user_id: i64,
    lat: f64,
    lng: f64,
    now: DateTime<Utc>,
) -> Result<Vec<AnomalyFinding>, DbErr> {
    let history = RecordEntity::find()
        .filter(RecordCol::UserId.eq(user_id))
        .order_by_desc(RecordCol::MarkedAt)
        .limit(JUMP_HISTORY_LEN)
        .all(db)
        .await?;

    let mut findings = Vec::new();

    if let Some(prev) = history.first() {
        let gap_secs = (now - prev.marked_at).num_seconds();
        let distance_m = haversine_m(lat, lng, prev.lat, prev.lng);
        if let Some(f) = velocity_finding(distance_m, gap_secs) {
            findings.push(f);
        }
    }

    let displacements: Vec<f64> = history
        .iter()
        .map(|r| haversine_m(lat, lng, r.lat, r.lng))
        .collect();
    if let Some(med) = median(displacements) {
        if let Some(f) = jump_finding(med) {
            findings.push(f);
        }
    }

    Ok(findings)
}

/// Sum of severity weights, stored on the record for quick triage.
pub fn anomaly_score(findings: &[AnomalyFinding]) -> i32 {
    findings
        .iter()
        .map(|f| match f.severity {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hatfield campus to Pretoria CBD is roughly 5.6 km.
    const HATFIELD: (f64, f64) = (-25.7545, 28.2314);
    const PRETORIA_CBD: (f64, f64) = (-25.7479, 28.1879);

    #[test]
    fn haversine_known_distance() {
        let d = haversine_m(HATFIELD.0, HATFIELD.1, PRETORIA_CBD.0, PRETORIA_CBD.1);
        assert!((4_000.0..6_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn zero_distance_for_same_point() {
        assert!(haversine_m(HATFIELD.0, HATFIELD.1, HATFIELD.0, HATFIELD.1) < 1e-6);
    }

    #[test]
    fn within_radius_boundary() {
        let check = within_radius(HATFIELD.0, HATFIELD.1, HATFIELD.0, HATFIELD.1, 500.0);
        assert!(check.within);
        let far = within_radius(
            PRETORIA_CBD.0,
            PRETORIA_CBD.1,
            HATFIELD.0,
            HATFIELD.1,
            500.0,
        );
        assert!(!far.within);
        assert!(far.distance_m > 500.0);
    }

    #[test]
    fn velocity_severity_tiers() {
        // 1.2 km in 100 s = 12 m/s
        assert_eq!(velocity_finding(1_200.0, 100).unwrap().severity, Severity::Low);
        // 4.5 km in 100 s = 45 m/s
        assert_eq!(
            velocity_finding(4_500.0, 100).unwrap().severity,
            Severity::Medium
        );
        // 15 km in 100 s = 150 m/s
        assert_eq!(
            velocity_finding(15_000.0, 100).unwrap().severity,
            Severity::High
        );
        // walking pace is fine
        assert!(velocity_finding(100.0, 100).is_none());
    }

    #[test]
    fn short_gaps_are_ignored() {
        // huge displacement but only 30s apart: same-session noise
        assert!(velocity_finding(100_000.0, 30).is_none());
        assert!(velocity_finding(100_000.0, 0).is_none());
    }

    #[test]
    fn jump_threshold() {
        assert!(jump_finding(60_000.0).is_some());
        assert!(jump_finding(10_000.0).is_none());
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn anomaly_score_sums_weights() {
        let findings = vec![
            velocity_finding(1_200.0, 100).unwrap(),  // low = 1
            jump_finding(60_000.0).unwrap(),          // high = 3
        ];
        assert_eq!(anomaly_score(&findings), 4);
        assert_eq!(anomaly_score(&[]), 0);
    }
}
