//! Placeholder payloads returned when rate-limited data cannot be fetched.

use serde::Serialize;
use serde_json::Value;

/// Known classes of governed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Dashboard,
    Activities,
    Analytics,
    Realtime,
    /// Anything not recognized; gets the generic fallback shape.
    Generic,
}

impl OperationClass {
    /// Classify an endpoint path or operation name. Matching is
    /// case-insensitive; the first recognized fragment wins, in the order
    /// dashboard, activities, analytics, realtime.
    pub fn from_endpoint(endpoint: &str) -> Self {
        let endpoint = endpoint.to_ascii_lowercase();
        const TABLE: [(&str, OperationClass); 5] = [
            ("dashboard", OperationClass::Dashboard),
            ("activit", OperationClass::Activities),
            ("analytics", OperationClass::Analytics),
            ("realtime", OperationClass::Realtime),
            ("real-time", OperationClass::Realtime),
        ];

        TABLE
            .iter()
            .find(|(fragment, _)| endpoint.contains(fragment))
            .map(|(_, class)| *class)
            .unwrap_or(OperationClass::Generic)
    }

    /// Human-readable name for notifications; `None` for generic endpoints.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            OperationClass::Dashboard => Some("Dashboard"),
            OperationClass::Activities => Some("Recent Activities"),
            OperationClass::Analytics => Some("Analytics"),
            OperationClass::Realtime => Some("Live Updates"),
            OperationClass::Generic => None,
        }
    }

    pub fn fallback(&self) -> FallbackPayload {
        match self {
            OperationClass::Dashboard => FallbackPayload::Dashboard(DashboardSummary::default()),
            OperationClass::Activities => FallbackPayload::Activities(ActivityPage::empty()),
            OperationClass::Analytics => FallbackPayload::Analytics(AnalyticsSeries::default()),
            OperationClass::Realtime | OperationClass::Generic => FallbackPayload::Generic,
        }
    }
}

/// Label for an endpoint, falling back to the endpoint itself.
pub fn endpoint_label(endpoint: &str) -> String {
    OperationClass::from_endpoint(endpoint)
        .label()
        .map(str::to_string)
        .unwrap_or_else(|| endpoint.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_courses: u64,
    pub total_students: u64,
    pub total_revenue: f64,
    pub average_rating: f64,
    pub active_lectures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    pub items: Vec<Value>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

impl ActivityPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: 1,
            limit: 10,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSeries {
    pub total_views: u64,
    pub total_enrollments: u64,
    pub series: Vec<Value>,
}

/// Placeholder data, always marked `fallback: true` when serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackPayload {
    Dashboard(DashboardSummary),
    Activities(ActivityPage),
    Analytics(AnalyticsSeries),
    Generic,
}

#[derive(Serialize)]
struct Envelope<'a, D: Serialize> {
    success: bool,
    fallback: bool,
    data: Option<&'a D>,
    message: &'static str,
}

impl FallbackPayload {
    pub fn is_fallback(&self) -> bool {
        true
    }

    pub fn class(&self) -> OperationClass {
        match self {
            FallbackPayload::Dashboard(_) => OperationClass::Dashboard,
            FallbackPayload::Activities(_) => OperationClass::Activities,
            FallbackPayload::Analytics(_) => OperationClass::Analytics,
            FallbackPayload::Generic => OperationClass::Generic,
        }
    }

    /// JSON shape handed to callers: `{success, fallback: true, data, message}`.
    pub fn to_value(&self) -> Value {
        const DEGRADED: &str = "Showing placeholder data while the service is rate limited";
        let value = match self {
            FallbackPayload::Dashboard(data) => serde_json::to_value(Envelope {
                success: true,
                fallback: true,
                data: Some(data),
                message: DEGRADED,
            }),
            FallbackPayload::Activities(data) => serde_json::to_value(Envelope {
                success: true,
                fallback: true,
                data: Some(data),
                message: DEGRADED,
            }),
            FallbackPayload::Analytics(data) => serde_json::to_value(Envelope {
                success: true,
                fallback: true,
                data: Some(data),
                message: DEGRADED,
            }),
            FallbackPayload::Generic => serde_json::to_value(Envelope::<Value> {
                success: false,
                fallback: true,
                data: None,
                message: "Service temporarily unavailable due to rate limiting",
            }),
        };
        value.unwrap_or(Value::Null)
    }
}

impl Serialize for FallbackPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(OperationClass::from_endpoint("/teachers/dashboard/summary"), OperationClass::Dashboard);
        assert_eq!(OperationClass::from_endpoint("/teachers/123/activities?page=2"), OperationClass::Activities);
        assert_eq!(OperationClass::from_endpoint("recent-activity"), OperationClass::Activities);
        assert_eq!(OperationClass::from_endpoint("Analytics/Revenue"), OperationClass::Analytics);
        assert_eq!(OperationClass::from_endpoint("real-time-stats"), OperationClass::Realtime);
        assert_eq!(OperationClass::from_endpoint("/courses"), OperationClass::Generic);
    }

    #[test]
    fn test_labels() {
        assert_eq!(endpoint_label("/dashboard"), "Dashboard");
        assert_eq!(endpoint_label("/courses/42"), "/courses/42");
    }

    #[test]
    fn test_dashboard_fallback_is_zeroed() {
        let value = OperationClass::Dashboard.fallback().to_value();
        assert_eq!(value["fallback"], true);
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["totalCourses"], 0);
        assert_eq!(value["data"]["totalStudents"], 0);
        assert_eq!(value["data"]["totalRevenue"], 0.0);
    }

    #[test]
    fn test_activities_fallback_is_empty_page() {
        let value = OperationClass::Activities.fallback().to_value();
        assert_eq!(value["fallback"], true);
        assert_eq!(value["data"]["items"], serde_json::json!([]));
        assert_eq!(value["data"]["hasMore"], false);
    }

    #[test]
    fn test_generic_fallback_shape() {
        let value = OperationClass::Generic.fallback().to_value();
        assert_eq!(value["success"], false);
        assert_eq!(value["fallback"], true);
        assert!(value["data"].is_null());
    }
}
