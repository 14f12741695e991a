//! Alert creation rules
//!
//! Pure functions: each takes the evaluated inputs and returns the firing, if
//! any. Persistence and deduplication happen in [`super::AlertManager`].

use crate::config::{AlertRules, DropRule, IncidentRule};
use beacon_domain::{
    AlertDetails, AlertSeverity, AlertType, FactorKind, RiskBand, RiskFactorSample, RiskProfile,
    RiskWatermark,
};
use chrono::Duration;

/// A rule that fired
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    /// Alert type
    pub alert_type: AlertType,
    /// Severity
    pub severity: AlertSeverity,
    /// Human-readable message
    pub message: String,
    /// Typed details
    pub details: AlertDetails,
}

/// Band escalation against the last evaluated band (none counts as low)
///
/// A move into the high band is critical when the score jumped by more than
/// `abrupt_jump` since the last evaluation, otherwise high. A move into the
/// medium band is medium.
pub fn band_escalation(
    profile: &RiskProfile,
    watermark: Option<&RiskWatermark>,
    rules: &AlertRules,
) -> Option<Firing> {
    if !rules.band_escalation {
        return None;
    }

    let previous_band = watermark.map_or(RiskBand::Low, |w| w.band);
    if profile.band <= previous_band {
        return None;
    }

    let previous_score = watermark.map(|w| w.score);
    let severity = match profile.band {
        RiskBand::High => {
            let abrupt = previous_score.map_or(false, |prev| profile.score - prev > rules.abrupt_jump);
            if abrupt {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            }
        }
        _ => AlertSeverity::Medium,
    };

    let message = match previous_score {
        Some(prev) => format!(
            "Risk band rose from {} to {} (score {:.2} -> {:.2})",
            previous_band.as_str(),
            profile.band.as_str(),
            prev,
            profile.score
        ),
        None => format!(
            "Risk band is {} (score {:.2})",
            profile.band.as_str(),
            profile.score
        ),
    };

    Some(Firing {
        alert_type: AlertType::BandEscalation,
        severity,
        message,
        details: AlertDetails::MultiFactor {
            previous_band,
            band: profile.band,
            previous_score,
            score: profile.score,
        },
    })
}

/// Sharp fall of `kind` against the highest sample in the preceding window
///
/// `history` may contain the new sample and samples of other kinds; both are ignored.
pub fn factor_drop(
    kind: FactorKind,
    sample: &RiskFactorSample,
    history: &[RiskFactorSample],
    rule: &DropRule,
) -> Option<Firing> {
    if !rule.enabled || sample.kind != kind {
        return None;
    }

    let window_start = sample.observed_at - Duration::days(i64::from(rule.window_days));
    let baseline = history
        .iter()
        .filter(|s| s.kind == kind && s.id != sample.id)
        .filter(|s| s.observed_at >= window_start && s.observed_at < sample.observed_at)
        .map(|s| s.value)
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))?;

    let drop = baseline - sample.value;
    if drop <= rule.min_drop {
        return None;
    }

    let (alert_type, details, label) = match kind {
        FactorKind::Attendance => (
            AlertType::AttendanceDrop,
            AlertDetails::Attendance {
                baseline,
                current: sample.value,
                window_days: rule.window_days,
            },
            "Attendance",
        ),
        _ => (
            AlertType::AcademicDecline,
            AlertDetails::Academic {
                baseline,
                current: sample.value,
                window_days: rule.window_days,
            },
            "Academic standing",
        ),
    };

    Some(Firing {
        alert_type,
        severity: rule.severity,
        message: format!(
            "{} fell {:.1} points ({:.1} -> {:.1}) within {} days",
            label, drop, baseline, sample.value, rule.window_days
        ),
        details,
    })
}

/// Behavioral sample at or below the incident threshold
pub fn behavioral_incident(sample: &RiskFactorSample, rule: &IncidentRule) -> Option<Firing> {
    if !rule.enabled || sample.kind != FactorKind::Behavioral || sample.value > rule.threshold {
        return None;
    }

    Some(Firing {
        alert_type: AlertType::BehavioralIncident,
        severity: rule.severity,
        message: format!(
            "Behavioral rating {:.1} is at or below {:.1}",
            sample.value, rule.threshold
        ),
        details: AlertDetails::Behavioral {
            value: sample.value,
            threshold: rule.threshold,
        },
    })
}

/// Every single-factor rule for one new sample
pub fn single_factor(
    sample: &RiskFactorSample,
    history: &[RiskFactorSample],
    rules: &AlertRules,
) -> Vec<Firing> {
    [
        factor_drop(FactorKind::Attendance, sample, history, &rules.attendance_drop),
        factor_drop(FactorKind::Academic, sample, history, &rules.academic_decline),
        behavioral_incident(sample, &rules.behavioral_incident),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_domain::scoring::compute_profile;
    use beacon_domain::{ScoringConfig, StudentId};
    use chrono::{DateTime, TimeZone, Utc};

    fn sid() -> StudentId {
        StudentId::new("S-1").unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 8, 0, 0).unwrap()
    }

    fn sample(kind: FactorKind, value: f64, at: DateTime<Utc>) -> RiskFactorSample {
        RiskFactorSample::new(sid(), kind, value, at).unwrap()
    }

    fn profile_at(value: f64) -> RiskProfile {
        let samples: Vec<_> = FactorKind::ALL
            .iter()
            .map(|k| sample(*k, value, day(1)))
            .collect();
        compute_profile(&sid(), &samples, &[], &ScoringConfig::default(), None).unwrap()
    }

    fn watermark(band: RiskBand, score: f64) -> RiskWatermark {
        RiskWatermark {
            student_id: sid(),
            band,
            score,
            evaluated_at: day(1),
        }
    }

    #[test]
    fn test_abrupt_escalation_is_critical() {
        // composite 78 after 55
        let profile = profile_at(22.0);
        let firing = band_escalation(
            &profile,
            Some(&watermark(RiskBand::Medium, 55.0)),
            &AlertRules::default(),
        )
        .unwrap();
        assert_eq!(firing.alert_type, AlertType::BandEscalation);
        assert_eq!(firing.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_gradual_escalation_is_high() {
        let profile = profile_at(25.0); // 75
        let firing = band_escalation(
            &profile,
            Some(&watermark(RiskBand::Medium, 65.0)),
            &AlertRules::default(),
        )
        .unwrap();
        assert_eq!(firing.severity, AlertSeverity::High);
    }

    #[test]
    fn test_medium_band_from_nothing() {
        let profile = profile_at(45.0); // 55
        let firing = band_escalation(&profile, None, &AlertRules::default()).unwrap();
        assert_eq!(firing.severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_same_or_lower_band_does_not_fire() {
        let profile = profile_at(45.0);
        let rules = AlertRules::default();
        assert!(band_escalation(&profile, Some(&watermark(RiskBand::Medium, 50.0)), &rules).is_none());
        assert!(band_escalation(&profile, Some(&watermark(RiskBand::High, 80.0)), &rules).is_none());
        assert!(band_escalation(&profile_at(90.0), None, &rules).is_none());
    }

    #[test]
    fn test_attendance_drop_within_window() {
        let rules = AlertRules::default();
        let earlier = sample(FactorKind::Attendance, 85.0, day(1));
        let now = sample(FactorKind::Attendance, 65.0, day(6));
        let history = vec![earlier, now.clone()];

        let firings = single_factor(&now, &history, &rules);
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].alert_type, AlertType::AttendanceDrop);
        assert!(firings[0].severity >= AlertSeverity::Medium);
        assert_eq!(firings[0].details.drop(), Some(20.0));
    }

    #[test]
    fn test_attendance_drop_outside_window_or_small() {
        let rules = AlertRules::default();
        let old = sample(FactorKind::Attendance, 85.0, day(1));
        let now = sample(FactorKind::Attendance, 65.0, day(10));
        assert!(single_factor(&now, &[old], &rules).is_empty());

        let close = sample(FactorKind::Attendance, 80.0, day(8));
        assert!(single_factor(&now, &[close], &rules).is_empty());
    }

    #[test]
    fn test_academic_decline_uses_thirty_days() {
        let rules = AlertRules::default();
        let earlier = sample(FactorKind::Academic, 90.0, day(1));
        let now = sample(FactorKind::Academic, 70.0, day(25));
        let firings = single_factor(&now, &[earlier], &rules);
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].alert_type, AlertType::AcademicDecline);
        assert_eq!(firings[0].severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_behavioral_incident_threshold() {
        let rules = AlertRules::default();
        let at_threshold = sample(FactorKind::Behavioral, 30.0, day(2));
        let above = sample(FactorKind::Behavioral, 30.5, day(2));
        assert_eq!(single_factor(&at_threshold, &[], &rules).len(), 1);
        assert!(single_factor(&above, &[], &rules).is_empty());
    }
}
