//! Time-sliced token protocol.
//!
//! Tokens are HMAC-SHA256 signatures over `(session_id, phase, sequence)`
//! where `sequence` is a global time bucket: `floor(now_ms / rotation_ms)`.
//! A token is accepted for the current bucket, or for the previous one while
//! the clock is still within the grace window after a rotation boundary.
//! Reverification uses [`verify_for_slot`], which binds acceptance to the
//! student's assigned slot sequence instead of the live clock, so a token
//! screenshotted outside the slot is useless even if globally fresh.

use chrono::{DateTime, Utc};
use db::models::attendance_session::Phase;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Global time-bucket index shared by all sessions with the same rotation.
pub fn sequence(now: DateTime<Utc>, rotation_ms: i64) -> i64 {
    now.timestamp_millis().div_euclid(rotation_ms.max(1))
}

/// Milliseconds until the next rotation boundary, for the lecturer display.
pub fn ms_until_rotation(now: DateTime<Utc>, rotation_ms: i64) -> i64 {
    let rot = rotation_ms.max(1);
    rot - now.timestamp_millis().rem_euclid(rot)
}

fn phase_tag(phase: Phase) -> u8 {
    match phase {
        Phase::Initial => 1,
        Phase::Reverify => 2,
        Phase::Closed => 0,
    }
}

/// Derives the signed token for one `(session, phase, sequence)` triple.
///
/// The session secret is stored as hex; a non-hex secret is keyed raw so a
/// bad seed degrades to a weaker key instead of a panic path.
pub fn mint(secret_hex: &str, session_id: i64, phase: Phase, seq: i64) -> String {
    let key = hex::decode(secret_hex).unwrap_or_else(|_| secret_hex.as_bytes().to_vec());
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(&session_id.to_be_bytes());
    mac.update(&[phase_tag(phase)]);
    mac.update(&seq.to_be_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a presented token against the current sequence, tolerating the
/// immediately previous one within `grace_ms` of the boundary.
///
/// Returns the accepted sequence, or `None`. A token from two or more
/// rotations ago always fails.
pub fn verify(
    secret_hex: &str,
    token: &str,
    session_id: i64,
    phase: Phase,
    now: DateTime<Utc>,
    rotation_ms: i64,
    grace_ms: i64,
) -> Option<i64> {
    let token = token.trim();
    let seq = sequence(now, rotation_ms);
    if mint(secret_hex, session_id, phase, seq) == token {
        return Some(seq);
    }
    let into_window = now.timestamp_millis().rem_euclid(rotation_ms.max(1));
    if into_window < grace_ms && mint(secret_hex, session_id, phase, seq - 1) == token {
        return Some(seq - 1);
    }
    None
}

/// Slot-bound verification for reverification submissions.
///
/// The token must match exactly the sequence of the student's assigned slot,
/// and `now` must fall inside that slot (or within `grace_ms` after it).
pub fn verify_for_slot(
    secret_hex: &str,
    token: &str,
    session_id: i64,
    slot_seq: i64,
    now: DateTime<Utc>,
    rotation_ms: i64,
    grace_ms: i64,
) -> bool {
    let cur = sequence(now, rotation_ms);
    let in_slot = cur == slot_seq
        || (cur == slot_seq + 1
            && now.timestamp_millis().rem_euclid(rotation_ms.max(1)) < grace_ms);
    in_slot && mint(secret_hex, session_id, Phase::Reverify, slot_seq) == token.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn sequence_is_a_global_time_bucket() {
        // Scenario A: 30.2s after epoch with 5s rotation -> sequence 6
        assert_eq!(sequence(at_ms(30_200), 5000), 6);
        assert_eq!(sequence(at_ms(0), 5000), 0);
        assert_eq!(sequence(at_ms(4_999), 5000), 0);
        assert_eq!(sequence(at_ms(5_000), 5000), 1);
    }

    #[test]
    fn current_token_verifies() {
        let now = at_ms(30_200);
        let tok = mint(SECRET, 7, Phase::Initial, 6);
        assert_eq!(verify(SECRET, &tok, 7, Phase::Initial, now, 5000, 1500), Some(6));
    }

    #[test]
    fn stale_token_fails() {
        // Scenario A: token from sequence 4 never verifies at sequence 6
        let now = at_ms(30_200);
        let tok = mint(SECRET, 7, Phase::Initial, 4);
        assert_eq!(verify(SECRET, &tok, 7, Phase::Initial, now, 5000, 1500), None);
    }

    #[test]
    fn previous_sequence_accepted_only_within_grace() {
        let tok = mint(SECRET, 7, Phase::Initial, 5);
        // 30.2s: 200ms into sequence 6 -> within 1500ms grace
        assert_eq!(
            verify(SECRET, &tok, 7, Phase::Initial, at_ms(30_200), 5000, 1500),
            Some(5)
        );
        // 32.0s: 2000ms into sequence 6 -> outside grace
        assert_eq!(
            verify(SECRET, &tok, 7, Phase::Initial, at_ms(32_000), 5000, 1500),
            None
        );
    }

    #[test]
    fn two_step_replay_always_fails_even_in_grace() {
        let tok = mint(SECRET, 7, Phase::Initial, 4);
        assert_eq!(
            verify(SECRET, &tok, 7, Phase::Initial, at_ms(30_200), 5000, 1500),
            None
        );
    }

    #[test]
    fn token_is_bound_to_session_and_phase() {
        let now = at_ms(30_200);
        let other_session = mint(SECRET, 8, Phase::Initial, 6);
        assert_eq!(
            verify(SECRET, &other_session, 7, Phase::Initial, now, 5000, 1500),
            None
        );
        let wrong_phase = mint(SECRET, 7, Phase::Reverify, 6);
        assert_eq!(
            verify(SECRET, &wrong_phase, 7, Phase::Initial, now, 5000, 1500),
            None
        );
    }

    #[test]
    fn slot_verification_rejects_globally_valid_tokens() {
        // Student's slot is sequence 10; clock currently shows sequence 10.
        let now = at_ms(52_000);
        assert_eq!(sequence(now, 5000), 10);

        let slot_tok = mint(SECRET, 7, Phase::Reverify, 10);
        assert!(verify_for_slot(SECRET, &slot_tok, 7, 10, now, 5000, 1500));

        // A token for sequence 9 is still inside the ordinary grace window,
        // but it is not the slot's sequence: rejected.
        let prev_tok = mint(SECRET, 7, Phase::Reverify, 9);
        assert!(!verify_for_slot(SECRET, &prev_tok, 7, 10, now, 5000, 1500));
    }

    #[test]
    fn slot_verification_rejects_outside_the_slot_window() {
        let slot_tok = mint(SECRET, 7, Phase::Reverify, 10);
        // Slot 10 spans [50s, 55s). At 56.6s (1600ms past), grace of 1500 exhausted.
        assert!(!verify_for_slot(SECRET, &slot_tok, 7, 10, at_ms(56_600), 5000, 1500));
        // At 55.2s the submission is within grace.
        assert!(verify_for_slot(SECRET, &slot_tok, 7, 10, at_ms(55_200), 5000, 1500));
        // Before the slot opens the token is not yet usable.
        assert!(!verify_for_slot(SECRET, &slot_tok, 7, 10, at_ms(49_000), 5000, 1500));
    }

    #[test]
    fn ms_until_rotation_counts_down() {
        assert_eq!(ms_until_rotation(at_ms(30_200), 5000), 4_800);
        assert_eq!(ms_until_rotation(at_ms(35_000), 5000), 5_000);
    }
}
