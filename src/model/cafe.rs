use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server identifier of a cafe
pub type CafeId = i64;

/// Opaque identifier of a remotely addressable binary resource (an image)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Cafe profile shown at the top of the management screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafeDetail {
    pub id: CafeId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    /// Images to show for this cafe, fetched through the resource cache
    #[serde(default)]
    pub image_keys: Vec<ResourceKey>,
}

/// Current occupancy of a cafe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CafeUsage {
    pub total_seats: u32,
    pub occupied_seats: u32,
}

impl CafeUsage {
    pub fn available_seats(&self) -> u32 {
        self.total_seats.saturating_sub(self.occupied_seats)
    }

    /// Occupancy ratio in `0.0..=1.0`
    pub fn occupancy(&self) -> f64 {
        if self.total_seats == 0 {
            0.0
        } else {
            (self.occupied_seats.min(self.total_seats)) as f64 / self.total_seats as f64
        }
    }
}

/// A reservation session on one seat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: i64,
    pub seat_id: i64,
    pub user_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    /// Whether the session is still running at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.started_at <= now && self.ends_at.map_or(true, |end| now < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_usage_math() {
        let usage = CafeUsage {
            total_seats: 40,
            occupied_seats: 10,
        };
        assert_eq!(usage.available_seats(), 30);
        assert!((usage.occupancy() - 0.25).abs() < f64::EPSILON);

        let empty = CafeUsage {
            total_seats: 0,
            occupied_seats: 0,
        };
        assert_eq!(empty.occupancy(), 0.0);
    }

    #[test]
    fn test_session_activity() {
        let now = Utc::now();
        let open = SessionInfo {
            id: 1,
            seat_id: 3,
            user_name: "kim".into(),
            started_at: now - Duration::hours(1),
            ends_at: None,
        };
        assert!(open.is_active_at(now));

        let finished = SessionInfo {
            ends_at: Some(now - Duration::minutes(5)),
            ..open.clone()
        };
        assert!(!finished.is_active_at(now));
    }

    #[test]
    fn test_cafe_detail_defaults() {
        let detail: CafeDetail = serde_json::from_str(r#"{"id": 9, "name": "Test Cafe"}"#).unwrap();
        assert_eq!(detail.name, "Test Cafe");
        assert!(detail.image_keys.is_empty());
        assert!(detail.address.is_none());
    }
}
