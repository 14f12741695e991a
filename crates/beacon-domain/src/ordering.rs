//! Named orderings used by list endpoints

use crate::Alert;
use std::cmp::Ordering;

/// Most severe first, then newest first; ids break remaining ties
pub fn by_severity_then_recency(a: &Alert, b: &Alert) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort alerts in place with [`by_severity_then_recency`]
pub fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(by_severity_then_recency);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertDetails, AlertSeverity, AlertType};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn alert(severity: AlertSeverity, minutes: i64) -> Alert {
        Alert::raise(
            None,
            AlertType::System,
            severity,
            format!("{:?} at {}", severity, minutes),
            AlertDetails::System {
                source: "test".to_string(),
            },
            BTreeMap::new(),
            Utc::now() + Duration::minutes(minutes),
        )
    }

    #[test]
    fn test_severity_desc_then_created_desc() {
        let mut alerts = vec![
            alert(AlertSeverity::Medium, 5),
            alert(AlertSeverity::Critical, 0),
            alert(AlertSeverity::Medium, 10),
            alert(AlertSeverity::Low, 20),
        ];
        sort_alerts(&mut alerts);

        let order: Vec<(AlertSeverity, String)> = alerts
            .iter()
            .map(|a| (a.severity, a.message.clone()))
            .collect();
        assert_eq!(order[0].0, AlertSeverity::Critical);
        assert_eq!(order[1].1, "Medium at 10");
        assert_eq!(order[2].1, "Medium at 5");
        assert_eq!(order[3].0, AlertSeverity::Low);
    }
}
