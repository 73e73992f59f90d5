//! Confidence fusion: four independent presence signals fold into a bounded
//! additive score, classified against the tenant's threshold.

/// Signal weights. Additive and independent; the maximum is structurally 100.
pub const BIOMETRIC_POINTS: i32 = 40;
pub const GPS_POINTS: i32 = 30;
pub const TOKEN_POINTS: i32 = 20;
pub const NETWORK_POINTS: i32 = 10;

/// The four independent presence signals for one submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals {
    /// External WebAuthn ceremony reported success.
    pub biometric_verified: bool,
    /// GPS distance within the session geofence radius (binary, no partial credit).
    pub within_radius: bool,
    /// A fresh, non-replayed token was presented for the current sequence.
    pub token_valid: bool,
    /// Requesting address inside a tenant trusted CIDR.
    pub network_trusted: bool,
}

/// Additive score in `[0, 100]`.
pub fn score(signals: Signals) -> i32 {
    let mut total = 0;
    if signals.biometric_verified {
        total += BIOMETRIC_POINTS;
    }
    if signals.within_radius {
        total += GPS_POINTS;
    }
    if signals.token_valid {
        total += TOKEN_POINTS;
    }
    if signals.network_trusted {
        total += NETWORK_POINTS;
    }
    total
}

/// Flag classification.
///
/// A record is flagged when the score falls below the tenant threshold OR an
/// anomaly was observed; reverify misses/failures re-assert the flag later in
/// the record lifecycle. The flag is a disjunction, never solely the score.
pub fn flagged(score: i32, threshold: i32, anomaly_observed: bool) -> bool {
    score < threshold || anomaly_observed
}
