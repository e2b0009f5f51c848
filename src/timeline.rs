//! Timeline events derived from date-valued observation fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, EventId, ObservationId, SourceId};
use crate::observation::Observation;

/// Default page size for timeline queries.
pub const DEFAULT_TIMELINE_LIMIT: usize = 50;
/// Largest page a timeline query may request.
pub const MAX_TIMELINE_LIMIT: usize = 500;

/// A dated event extracted from one observation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Derived from the observation ID and field.
    pub id: EventId,

    /// `<entity_type>.<field>`, e.g. `invoice.due_date`.
    pub event_type: String,

    /// The parsed date, at UTC midnight for plain dates.
    pub event_timestamp: DateTime<Utc>,

    /// Entity the date belongs to; moves on merge.
    pub entity_id: EntityId,

    /// Source of the observation.
    pub source_id: SourceId,

    /// Observation that carried the date.
    pub observation_id: ObservationId,

    /// Field the date was read from.
    pub field: String,
}

impl TimelineEvent {
    /// Total order used for listing: `(event_timestamp, id)`.
    #[must_use]
    pub fn sort_key(&self) -> (DateTime<Utc>, &EventId) {
        (self.event_timestamp, &self.id)
    }
}

/// Returns true if a field name marks a date.
#[must_use]
pub fn is_date_field(name: &str) -> bool {
    name == "date" || name.ends_with("_date") || name.ends_with("_at")
}

/// Parses an RFC 3339 timestamp or a `YYYY-MM-DD` date (midnight UTC).
#[must_use]
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Extracts every timeline event an observation carries.
#[must_use]
pub fn extract_events(observation: &Observation) -> Vec<TimelineEvent> {
    observation
        .fields
        .iter()
        .filter(|(name, _)| is_date_field(name))
        .filter_map(|(name, value)| {
            let ts = parse_event_timestamp(value.as_str()?)?;
            Some(TimelineEvent {
                id: EventId::for_field(&observation.id, name),
                event_type: format!("{}.{}", observation.entity_type, name),
                event_timestamp: ts,
                entity_id: observation.entity_id.clone(),
                source_id: observation.source_id.clone(),
                observation_id: observation.id.clone(),
                field: name.clone(),
            })
        })
        .collect()
}

/// Query over the timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimelineFilter {
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
    /// Only events of this entity.
    pub entity_id: Option<EntityId>,
    /// Only events of this `<entity_type>.<field>`.
    pub event_type: Option<String>,
    /// Page size; at least 1, clamped to [`MAX_TIMELINE_LIMIT`].
    pub limit: Option<usize>,
    /// Events to skip.
    pub offset: usize,
}

impl TimelineFilter {
    /// Page size after defaults and clamping.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_TIMELINE_LIMIT)
            .clamp(1, MAX_TIMELINE_LIMIT)
    }

    /// Returns true if an event passes the bounds and filters (paging aside).
    #[must_use]
    pub fn matches(&self, event: &TimelineEvent) -> bool {
        self.start.map_or(true, |s| event.event_timestamp >= s)
            && self.end.map_or(true, |e| event.event_timestamp <= e)
            && self.entity_id.as_ref().map_or(true, |id| &event.entity_id == id)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
    }

    /// Sorts, filters and pages a set of events.
    #[must_use]
    pub fn apply(&self, mut events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
        events.retain(|e| self.matches(e));
        events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        events
            .into_iter()
            .skip(self.offset)
            .take(self.effective_limit())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn invoice(fields: serde_json::Value) -> Observation {
        let map: BTreeMap<String, serde_json::Value> = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Observation::new(
            EntityId::for_key("invoice", "inv-1"),
            EntityType::new("invoice").unwrap(),
            SourceId::for_content(b"invoice"),
            0,
            map,
            100,
            Utc::now(),
        )
    }

    #[test]
    fn test_date_field_names() {
        assert!(is_date_field("date"));
        assert!(is_date_field("due_date"));
        assert!(is_date_field("paid_at"));
        assert!(!is_date_field("update"));
        assert!(!is_date_field("dated"));
    }

    #[test]
    fn test_parse_timestamps() {
        assert_eq!(
            parse_event_timestamp("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_event_timestamp("2024-03-01T10:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
        );
        assert!(parse_event_timestamp("March 1st").is_none());
        assert!(parse_event_timestamp("2024-13-01").is_none());
    }

    #[test]
    fn test_extract_events() {
        let obs = invoice(json!({
            "invoice_number": "INV-1",
            "issue_date": "2024-01-10",
            "due_date": "2024-02-10",
            "paid_at": "not a date",
            "amount": 100
        }));
        let events = extract_events(&obs);
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["invoice.due_date", "invoice.issue_date"]);
        assert!(events.iter().all(|e| e.observation_id == obs.id));
        assert_eq!(extract_events(&obs), events);
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let obs = invoice(json!({"issue_date": "2024-01-10", "due_date": "2024-02-10"}));
        let events = extract_events(&obs);
        let filter = TimelineFilter {
            start: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()),
            ..TimelineFilter::default()
        };
        let result = filter.apply(events);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].field, "issue_date");
    }

    #[test]
    fn test_ordering_and_paging() {
        let obs = invoice(json!({
            "date": "2024-03-01",
            "issue_date": "2024-01-01",
            "due_date": "2024-02-01"
        }));
        let all = TimelineFilter::default().apply(extract_events(&obs));
        let fields: Vec<&str> = all.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["issue_date", "due_date", "date"]);

        let page = TimelineFilter {
            limit: Some(1),
            offset: 1,
            ..TimelineFilter::default()
        }
        .apply(extract_events(&obs));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].field, "due_date");
    }

    #[test]
    fn test_limit_clamped() {
        let mut filter = TimelineFilter::default();
        assert_eq!(filter.effective_limit(), DEFAULT_TIMELINE_LIMIT);
        filter.limit = Some(10_000);
        assert_eq!(filter.effective_limit(), MAX_TIMELINE_LIMIT);
        filter.limit = Some(0);
        assert_eq!(filter.effective_limit(), 1);
    }
}
