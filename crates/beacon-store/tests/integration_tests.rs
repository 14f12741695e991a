//! Integration tests for beacon-store
//!
//! These tests exercise every repository trait against an in-memory database,
//! plus the open/close lifecycle on disk.

use beacon_domain::traits::{
    AlertQuery, AlertRepo, AlertUpsert, DispatchRepo, ExpenseEntry, InterventionRepo, StudentRepo,
    TrendRepo,
};
use beacon_domain::{
    Alert, AlertDetails, AlertId, AlertSeverity, AlertStatus, AlertTransition, AlertType,
    AttemptId, AttemptStatus, BandCounts, Channel, ChannelAttempt, CohortTrendPoint,
    DeliveryIntent, Effectiveness, FactorKind, Intervention, InterventionKind,
    InterventionStatus, NewIntervention, OutcomeDelta, RepoError, RiskBand, RiskFactorSample,
    RiskWatermark, Student, StudentId,
};
use beacon_store::SqliteStore;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap()
}

fn sid(id: &str) -> StudentId {
    StudentId::new(id).unwrap()
}

fn store_with_student(id: &str) -> SqliteStore {
    let store = SqliteStore::open(":memory:").unwrap();
    store
        .insert_student(&Student::enroll(sid(id), 9, t0() - Duration::days(200)).unwrap())
        .unwrap();
    store
}

fn attendance_alert(student: &str, at: DateTime<Utc>, current: f64) -> Alert {
    let mut snapshot = BTreeMap::new();
    snapshot.insert(FactorKind::Attendance, current);
    Alert::raise(
        Some(sid(student)),
        AlertType::AttendanceDrop,
        AlertSeverity::High,
        format!("Attendance fell to {}", current),
        AlertDetails::Attendance {
            baseline: 85.0,
            current,
            window_days: 7,
        },
        snapshot,
        at,
    )
}

#[test]
fn test_store_initialization() {
    let store = SqliteStore::open(":memory:");
    assert!(store.is_ok(), "Store should initialize successfully");
}

#[test]
fn test_student_lifecycle() {
    let store = store_with_student("S-1");

    let mut student = store.get_student(&sid("S-1")).unwrap().unwrap();
    assert_eq!(student.grade_level, 9);

    student.change_grade(10).unwrap();
    student.archive(t0());
    store.update_student(&student).unwrap();

    let reloaded = store.get_student(&sid("S-1")).unwrap().unwrap();
    assert_eq!(reloaded, student);

    let duplicate = Student::enroll(sid("S-1"), 9, t0()).unwrap();
    assert!(matches!(
        store.insert_student(&duplicate),
        Err(RepoError::Conflict(_))
    ));

    let unknown = Student::enroll(sid("S-404"), 9, t0()).unwrap();
    assert!(matches!(
        store.update_student(&unknown),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn test_samples_are_append_only_and_bounded() {
    let store = store_with_student("S-1");

    let early = RiskFactorSample::new(sid("S-1"), FactorKind::Attendance, 85.0, t0()).unwrap();
    let late = RiskFactorSample::new(
        sid("S-1"),
        FactorKind::Attendance,
        65.0,
        t0() + Duration::days(5),
    )
    .unwrap();
    // Same kind and timestamp as `late`: both are retained
    let twin = RiskFactorSample::new(
        sid("S-1"),
        FactorKind::Attendance,
        70.0,
        t0() + Duration::days(5),
    )
    .unwrap();

    store.append_sample(&early).unwrap();
    store.append_sample(&late).unwrap();
    store.append_sample(&twin).unwrap();

    let all = store.samples_for(&sid("S-1"), None).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0], early);

    let before = store
        .samples_for(&sid("S-1"), Some(t0() + Duration::days(5)))
        .unwrap();
    assert_eq!(before, vec![early]);
}

#[test]
fn test_sample_batch_is_all_or_nothing() {
    let store = store_with_student("S-1");

    let first = RiskFactorSample::new(sid("S-1"), FactorKind::Attendance, 80.0, t0()).unwrap();
    let second = RiskFactorSample::new(sid("S-1"), FactorKind::Academic, 70.0, t0()).unwrap();
    store.append_sample(&second).unwrap();

    // `second` is already stored, so the batch fails after writing `first`
    let fresh = RiskFactorSample::new(sid("S-1"), FactorKind::Behavioral, 60.0, t0()).unwrap();
    assert!(store
        .append_samples(&[first.clone(), fresh.clone(), second.clone()])
        .is_err());
    assert_eq!(store.samples_for(&sid("S-1"), None).unwrap(), vec![second]);

    store.append_samples(&[first, fresh]).unwrap();
    assert_eq!(store.samples_for(&sid("S-1"), None).unwrap().len(), 3);
}

#[test]
fn test_upsert_creates_then_refreshes() {
    let store = store_with_student("S-1");

    let first = attendance_alert("S-1", t0(), 65.0);
    let created = store.upsert_active_alert(&first).unwrap();
    assert!(matches!(created, AlertUpsert::Created(_)));

    let second = attendance_alert("S-1", t0() + Duration::days(1), 60.0);
    let refreshed = store.upsert_active_alert(&second).unwrap();
    match refreshed {
        AlertUpsert::Refreshed(alert) => {
            assert_eq!(alert.id, first.id);
            assert_eq!(alert.created_at, t0());
            assert_eq!(alert.updated_at, t0() + Duration::days(1));
            assert_eq!(alert.details, first.details);
            assert_eq!(alert.message, first.message);
            assert_eq!(alert.factor_snapshot, second.factor_snapshot);
        }
        AlertUpsert::Created(_) => panic!("expected refresh of the active alert"),
    }

    let stored = store.get_alert(first.id).unwrap().unwrap();
    assert_eq!(stored.message, "Attendance fell to 65");
    assert_eq!(stored.factor_snapshot[&FactorKind::Attendance], 60.0);

    let active = store
        .query_alerts(&AlertQuery {
            status: Some(AlertStatus::Active),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(active.len(), 1);
}

fn escalation(student: &str, band: RiskBand, severity: AlertSeverity, at: DateTime<Utc>) -> Alert {
    Alert::raise(
        Some(sid(student)),
        AlertType::BandEscalation,
        severity,
        format!("Risk band is {}", band.as_str()),
        AlertDetails::MultiFactor {
            previous_band: RiskBand::Low,
            band,
            previous_score: None,
            score: 60.0,
        },
        BTreeMap::new(),
        at,
    )
}

#[test]
fn test_escalations_into_different_bands_are_distinct_alerts() {
    let store = store_with_student("S-1");

    let medium = escalation("S-1", RiskBand::Medium, AlertSeverity::Medium, t0());
    assert!(matches!(
        store.upsert_active_alert(&medium).unwrap(),
        AlertUpsert::Created(_)
    ));

    let high = escalation(
        "S-1",
        RiskBand::High,
        AlertSeverity::Critical,
        t0() + Duration::days(1),
    );
    match store.upsert_active_alert(&high).unwrap() {
        AlertUpsert::Created(alert) => {
            assert_eq!(alert.id, high.id);
            assert_eq!(alert.severity, AlertSeverity::Critical);
        }
        AlertUpsert::Refreshed(_) => panic!("a move into high must raise its own alert"),
    }

    let again = escalation(
        "S-1",
        RiskBand::High,
        AlertSeverity::High,
        t0() + Duration::days(2),
    );
    assert!(matches!(
        store.upsert_active_alert(&again).unwrap(),
        AlertUpsert::Refreshed(ref a) if a.id == high.id && a.severity == AlertSeverity::Critical
    ));

    let untouched = store.get_alert(medium.id).unwrap().unwrap();
    assert_eq!(untouched.severity, AlertSeverity::Medium);
    assert_eq!(untouched.updated_at, t0());
}

#[test]
fn test_concurrent_upserts_keep_one_active_alert() {
    let store = Arc::new(store_with_student("S-1"));

    std::thread::scope(|scope| {
        for i in 0..8 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                let alert = attendance_alert("S-1", t0() + Duration::minutes(i), 60.0);
                store.upsert_active_alert(&alert).unwrap();
            });
        }
    });

    let alerts = store
        .query_alerts(&AlertQuery {
            student_id: Some(sid("S-1")),
            alert_type: Some(AlertType::AttendanceDrop),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(alerts.len(), 1);
}

#[test]
fn test_transition_is_compare_and_set() {
    let store = store_with_student("S-1");
    let alert = attendance_alert("S-1", t0(), 65.0);
    store.upsert_active_alert(&alert).unwrap();

    let ack = AlertTransition {
        alert_id: alert.id,
        from: AlertStatus::Active,
        to: AlertStatus::Acknowledged,
        at: t0() + Duration::hours(1),
        actor: Some("counselor".to_string()),
    };
    let updated = store.transition_alert(&ack).unwrap();
    assert_eq!(updated.status, AlertStatus::Acknowledged);

    // Same transition again lost the race
    assert!(matches!(
        store.transition_alert(&ack),
        Err(RepoError::Conflict(_))
    ));

    let missing = AlertTransition {
        alert_id: AlertId::new(),
        ..ack.clone()
    };
    assert!(matches!(
        store.transition_alert(&missing),
        Err(RepoError::NotFound(_))
    ));

    let log = store.transitions_before(t0() + Duration::days(1)).unwrap();
    assert_eq!(log, vec![ack]);
    assert!(store.transitions_before(t0()).unwrap().is_empty());
}

#[test]
fn test_new_alert_allowed_once_previous_leaves_active() {
    let store = store_with_student("S-1");
    let first = attendance_alert("S-1", t0(), 65.0);
    store.upsert_active_alert(&first).unwrap();
    store
        .transition_alert(&AlertTransition {
            alert_id: first.id,
            from: AlertStatus::Active,
            to: AlertStatus::Resolved,
            at: t0() + Duration::hours(1),
            actor: None,
        })
        .unwrap();

    let second = attendance_alert("S-1", t0() + Duration::days(2), 55.0);
    assert!(matches!(
        store.upsert_active_alert(&second).unwrap(),
        AlertUpsert::Created(_)
    ));
    assert_eq!(
        store.alerts_created_before(t0() + Duration::days(3)).unwrap().len(),
        2
    );
}

#[test]
fn test_assign_and_query_filters() {
    let store = store_with_student("S-1");
    let alert = attendance_alert("S-1", t0(), 65.0);
    store.upsert_active_alert(&alert).unwrap();

    let assigned = store
        .assign_alert(alert.id, "ms.rivera", t0() + Duration::hours(2))
        .unwrap();
    assert_eq!(assigned.assigned_to.as_deref(), Some("ms.rivera"));
    assert_eq!(assigned.updated_at, t0() + Duration::hours(2));

    let none = store
        .query_alerts(&AlertQuery {
            severity: Some(AlertSeverity::Critical),
            ..Default::default()
        })
        .unwrap();
    assert!(none.is_empty());

    assert!(matches!(
        store.assign_alert(AlertId::new(), "x", t0()),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn test_watermark_upsert() {
    let store = store_with_student("S-1");
    assert!(store.watermark(&sid("S-1")).unwrap().is_none());

    let mut mark = RiskWatermark {
        student_id: sid("S-1"),
        band: RiskBand::Medium,
        score: 55.0,
        evaluated_at: t0(),
    };
    store.save_watermark(&mark).unwrap();
    mark.band = RiskBand::High;
    mark.score = 78.0;
    store.save_watermark(&mark).unwrap();

    assert_eq!(store.watermark(&sid("S-1")).unwrap(), Some(mark));
}

fn planned_intervention() -> Intervention {
    Intervention::plan(
        NewIntervention {
            title: "Reading support".to_string(),
            kind: InterventionKind::AcademicTutoring,
            student_ids: vec![sid("S-1"), sid("S-2")],
            staff: vec!["ms.rivera".to_string()],
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: None,
            budget: 1000.0,
        },
        t0(),
    )
    .unwrap()
}

#[test]
fn test_intervention_versioning() {
    let store = SqliteStore::open(":memory:").unwrap();
    let planned = planned_intervention();
    store.insert_intervention(&planned).unwrap();

    let loaded = store.get_intervention(planned.id).unwrap().unwrap();
    assert_eq!(loaded, planned);

    let active = loaded
        .transition(InterventionStatus::Active, t0() + Duration::hours(1))
        .unwrap();
    let stored = store.update_intervention(&active, 1).unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.status, InterventionStatus::Active);

    // A writer still holding version 1 loses
    assert!(matches!(
        store.update_intervention(&active, 1),
        Err(RepoError::Conflict(_))
    ));

    assert_eq!(store.interventions_for_student(&sid("S-2")).unwrap().len(), 1);
    assert!(store.interventions_for_student(&sid("S-3")).unwrap().is_empty());
}

#[test]
fn test_progress_and_expense_logs() {
    let store = SqliteStore::open(":memory:").unwrap();
    let planned = planned_intervention();
    store.insert_intervention(&planned).unwrap();
    let active = store
        .update_intervention(
            &planned.transition(InterventionStatus::Active, t0()).unwrap(),
            1,
        )
        .unwrap();

    let (next, entry) = active
        .record_progress(
            50.0,
            OutcomeDelta {
                improved: 8,
                no_change: 2,
                declined: 1,
            },
            t0() + Duration::days(1),
        )
        .unwrap();
    let stored = store.record_progress(&next, &entry, active.version).unwrap();
    assert_eq!(stored.version, 3);

    let charged = stored.record_expense(1100.0, t0() + Duration::days(2));
    assert!(charged.is_err(), "1100 exceeds the 1000 budget");

    let raised = stored.increase_budget(1200.0, t0() + Duration::days(2)).unwrap();
    let stored = store.update_intervention(&raised, stored.version).unwrap();
    let charged = stored
        .record_expense(1100.0, t0() + Duration::days(2))
        .unwrap();
    let expense = ExpenseEntry {
        intervention_id: stored.id,
        amount: 1100.0,
        recorded_at: t0() + Duration::days(2),
    };
    let stored = store
        .record_expense(&charged, &expense, stored.version)
        .unwrap();
    assert_eq!(stored.spent, 1100.0);

    assert_eq!(
        store.progress_entries(stored.id, None).unwrap(),
        vec![entry]
    );
    assert!(store
        .all_progress_entries(t0() + Duration::days(1))
        .unwrap()
        .is_empty());
    assert_eq!(store.all_expenses(t0() + Duration::days(3)).unwrap(), vec![expense]);

    match stored.effectiveness() {
        Effectiveness::Measured {
            cost_per_success, ..
        } => assert_eq!(cost_per_success, Some(137.5)),
        Effectiveness::Undefined => panic!("outcomes were recorded"),
    }
}

fn attempt(alert_id: AlertId, slot: DateTime<Utc>, status: AttemptStatus) -> ChannelAttempt {
    ChannelAttempt {
        intent: DeliveryIntent {
            attempt_id: AttemptId::new(),
            alert_id,
            recipient: "counselor".to_string(),
            channel: Channel::Email,
            severity: AlertSeverity::High,
            subject: "Attendance drop".to_string(),
            body: "Attendance fell".to_string(),
            slot,
        },
        status,
        recorded_at: t0(),
    }
}

#[test]
fn test_dispatch_idempotency_and_release() {
    let store = store_with_student("S-1");
    let alert = attendance_alert("S-1", t0(), 65.0);
    store.upsert_active_alert(&alert).unwrap();

    let slot = t0() + Duration::hours(12);
    let first = attempt(alert.id, slot, AttemptStatus::Scheduled);
    assert!(store.record_attempt(&first).unwrap());
    assert!(!store
        .record_attempt(&attempt(alert.id, slot, AttemptStatus::Scheduled))
        .unwrap());

    assert!(store.due_attempts(t0()).unwrap().is_empty());
    let due = store.due_attempts(slot).unwrap();
    assert_eq!(due, vec![first.clone()]);

    store.mark_released(first.intent.attempt_id, slot).unwrap();
    assert!(store.due_attempts(slot).unwrap().is_empty());
    assert!(store.mark_released(first.intent.attempt_id, slot).is_err());

    let recorded = store.attempts_for_alert(alert.id).unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, AttemptStatus::Released);
}

fn point(start: DateTime<Utc>, end: DateTime<Utc>) -> CohortTrendPoint {
    CohortTrendPoint {
        period_start: start,
        period_end: end,
        enrolled: 3,
        bands: BandCounts {
            low: 1,
            medium: 1,
            high: 0,
        },
        unscored: 1,
        average_score: Some(42.5),
        average_attendance: Some(88.0),
        active_alerts: 1,
        intervention_success: Effectiveness::Undefined,
    }
}

#[test]
fn test_trend_cache_invalidation() {
    let store = SqliteStore::open(":memory:").unwrap();
    let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let mar = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    store.save_point(&point(jan, feb)).unwrap();
    store.save_point(&point(feb, mar)).unwrap();
    assert_eq!(store.cached_point(jan).unwrap(), Some(point(jan, feb)));

    // A write inside February invalidates February only
    let removed = store
        .invalidate_points_after(feb + Duration::days(3))
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.cached_point(feb).unwrap().is_none());
    assert!(store.cached_point(jan).unwrap().is_some());

    assert!(store.save_point(&point(feb, jan)).is_err());
}

#[test]
fn test_on_disk_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beacon.db");

    let store = SqliteStore::open(&path).unwrap();
    store
        .insert_student(&Student::enroll(sid("S-9"), 4, t0()).unwrap())
        .unwrap();
    store.close().unwrap();

    let reopened = SqliteStore::open(&path).unwrap();
    assert!(reopened.get_student(&sid("S-9")).unwrap().is_some());
    reopened.close().unwrap();
}
