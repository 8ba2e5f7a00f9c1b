//! Watch frames and how they are folded into cached data.

use crate::k8s::model::{uid_of, with_cluster};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Cached payload of one watch target.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetData {
    Single(Option<Value>),
    List(Vec<Value>),
}

impl FleetData {
    #[must_use]
    pub const fn empty(is_list: bool) -> Self {
        if is_list { Self::List(Vec::new()) } else { Self::Single(None) }
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(value) => usize::from(value.is_some()),
            Self::List(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON view: the object (or `null`) for single targets, an array for lists.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Single(value) => value.clone().unwrap_or(Value::Null),
            Self::List(items) => Value::Array(items.clone()),
        }
    }

    /// Normalize a GET response, annotating each object with `cluster` when given.
    #[must_use]
    pub fn from_response(body: &Value, is_list: bool, cluster: Option<&str>) -> Self {
        let annotate = |item: &Value| cluster.map_or_else(|| item.clone(), |c| with_cluster(item, c));
        if is_list {
            let items = body
                .get("items")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(annotate).collect())
                .unwrap_or_default();
            Self::List(items)
        } else {
            Self::Single(Some(annotate(body)))
        }
    }
}

/// One frame from a watch socket.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Value),
    Modified(Value),
    Deleted(Value),
    Other { event_type: String, object: Value },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    event_type: String,
    object: Option<Value>,
}

impl WatchEvent {
    /// `Ok(None)` for frames without an `object` payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for frames that are not valid watch events.
    pub fn parse(frame: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(frame)?;
        Ok(raw.object.filter(|o| !o.is_null()).map(|object| match raw.event_type.as_str() {
            "ADDED" => Self::Added(object),
            "MODIFIED" => Self::Modified(object),
            "DELETED" => Self::Deleted(object),
            _ => Self::Other {
                event_type: raw.event_type,
                object,
            },
        }))
    }

    #[must_use]
    pub const fn object(&self) -> &Value {
        match self {
            Self::Added(object) | Self::Modified(object) | Self::Deleted(object) => object,
            Self::Other { object, .. } => object,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::Other { event_type, .. } => event_type,
        }
    }
}

/// Fold `event` into `data`. Returns `true` when `data` changed and
/// subscribers should be told.
pub fn apply_watch_event(data: &mut FleetData, cluster: Option<&str>, event: &WatchEvent) -> bool {
    let annotate = |object: &Value| cluster.map_or_else(|| object.clone(), |c| with_cluster(object, c));

    match data {
        FleetData::Single(current) => match event {
            WatchEvent::Added(_) if current.is_some() => {
                debug!("⏭️ Ignoring ADDED for already loaded object");
                false
            }
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                *current = Some(annotate(object));
                true
            }
            _ => false,
        },
        FleetData::List(items) => match event {
            WatchEvent::Deleted(object) => {
                let uid = uid_of(object);
                items.retain(|item| uid_of(item) != uid);
                true
            }
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                let Some(uid) = uid_of(object) else {
                    warn!("⚠️ Dropping {} event without metadata.uid", event.event_type());
                    return false;
                };
                let existing = items.iter().position(|item| uid_of(item) == Some(uid));
                match (event, existing) {
                    (WatchEvent::Modified(_), Some(index)) => items[index] = annotate(object),
                    _ => items.push(annotate(object)),
                }
                true
            }
            WatchEvent::Other { .. } => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(uid: &str) -> Value {
        json!({"metadata": {"name": format!("pod-{uid}"), "uid": uid}})
    }

    #[test]
    fn list_round_trip_add_modify_delete() {
        let mut data = FleetData::empty(true);

        assert!(apply_watch_event(&mut data, Some("c1"), &WatchEvent::Added(pod("1"))));
        assert_eq!(data, FleetData::List(vec![with_cluster(&pod("1"), "c1")]));

        let mut modified = pod("1");
        modified["spec"] = json!({"foo": "bar"});
        assert!(apply_watch_event(&mut data, Some("c1"), &WatchEvent::Modified(modified.clone())));
        assert_eq!(data, FleetData::List(vec![with_cluster(&modified, "c1")]));

        assert!(apply_watch_event(&mut data, Some("c1"), &WatchEvent::Deleted(pod("1"))));
        assert_eq!(data, FleetData::List(vec![]));
    }

    #[test]
    fn modified_replaces_in_place() {
        let mut data = FleetData::List(vec![pod("1"), pod("2"), pod("3")]);
        let mut changed = pod("2");
        changed["spec"] = json!({"replicas": 2});

        apply_watch_event(&mut data, Some("c1"), &WatchEvent::Modified(changed.clone()));

        let FleetData::List(items) = data else { panic!("list expected") };
        assert_eq!(items[0], pod("1"));
        assert_eq!(items[1], with_cluster(&changed, "c1"));
        assert_eq!(items[2], pod("3"));
    }

    #[test]
    fn modified_unknown_uid_appends() {
        let mut data = FleetData::List(vec![pod("1")]);
        apply_watch_event(&mut data, Some("c1"), &WatchEvent::Modified(pod("9")));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn missing_uid_is_dropped() {
        let mut data = FleetData::List(vec![pod("1")]);
        let no_uid = json!({"metadata": {"name": "anonymous"}});
        assert!(!apply_watch_event(&mut data, Some("c1"), &WatchEvent::Added(no_uid.clone())));
        assert!(!apply_watch_event(&mut data, Some("c1"), &WatchEvent::Modified(no_uid)));
        assert_eq!(data, FleetData::List(vec![pod("1")]));
    }

    #[test]
    fn single_added_is_ignored_once_loaded() {
        let existing = with_cluster(&pod("1"), "c1");
        let mut data = FleetData::Single(Some(existing.clone()));

        let mut stale = pod("1");
        stale["status"] = json!("stale");
        assert!(!apply_watch_event(&mut data, Some("c1"), &WatchEvent::Added(stale)));
        assert_eq!(data, FleetData::Single(Some(existing)));

        let mut fresh = pod("1");
        fresh["status"] = json!("fresh");
        assert!(apply_watch_event(&mut data, Some("c1"), &WatchEvent::Modified(fresh.clone())));
        assert_eq!(data, FleetData::Single(Some(with_cluster(&fresh, "c1"))));
    }

    #[test]
    fn single_added_fills_empty_slot() {
        let mut data = FleetData::empty(false);
        assert!(apply_watch_event(&mut data, Some("c1"), &WatchEvent::Added(pod("1"))));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn other_event_types_are_ignored() {
        let mut data = FleetData::List(vec![pod("1")]);
        let bookmark = WatchEvent::Other {
            event_type: "BOOKMARK".to_string(),
            object: pod("1"),
        };
        assert!(!apply_watch_event(&mut data, Some("c1"), &bookmark));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn frame_parsing() {
        let event = WatchEvent::parse(r#"{"type":"ADDED","object":{"metadata":{"uid":"1"}}}"#).unwrap();
        assert!(matches!(event, Some(WatchEvent::Added(_))));

        assert_eq!(WatchEvent::parse(r#"{"type":"ADDED"}"#).unwrap(), None);
        assert!(WatchEvent::parse("not json").is_err());
    }

    #[test]
    fn response_normalization_injects_cluster() {
        let list = json!({"items": [pod("1"), pod("2")], "metadata": {"resourceVersion": "7"}});
        let data = FleetData::from_response(&list, true, Some("spoke"));
        let FleetData::List(items) = data else { panic!("list expected") };
        assert!(items.iter().all(|i| i["cluster"] == "spoke"));

        let single = FleetData::from_response(&pod("1"), false, Some("spoke"));
        assert_eq!(single, FleetData::Single(Some(with_cluster(&pod("1"), "spoke"))));
    }
}
