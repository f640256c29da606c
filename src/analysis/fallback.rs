use std::collections::BTreeMap;

use super::MetricsResult;

/// Stand-in result shown while the analysis service is unreachable. Values
/// match the demo data the dashboard ships with.
pub fn demo_metrics() -> MetricsResult {
    let angles = BTreeMap::from([
        ("neck_angle".to_string(), 12.0),
        ("shoulder_angle".to_string(), 168.0),
        ("hip_angle".to_string(), 175.0),
        ("knee_angle".to_string(), 180.0),
    ]);

    MetricsResult::new(
        89.0,
        Some("B+".to_string()),
        vec![
            "Slight forward head posture".to_string(),
            "Minor shoulder elevation".to_string(),
        ],
        vec![
            "Practice chin tucks throughout the day".to_string(),
            "Strengthen neck extensors".to_string(),
            "Regular shoulder blade squeezes".to_string(),
        ],
        angles,
    )
}

pub fn degradation_reason(cause: &anyhow::Error) -> String {
    format!("Using demo data - backend connection failed ({cause:#})")
}
