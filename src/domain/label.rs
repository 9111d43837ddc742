//! Label records and the coarse category mapping.

use serde::{Deserialize, Serialize};

/// Coarse content category of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopLabel {
    Person,
    Animal,
    Vehicle,
    Unknown,
    /// Labeling was attempted and failed. Cached so a broken video does not
    /// trigger a retry storm; superseded only by an explicit re-trigger.
    Error,
}

/// Axis-aligned box in normalized [0,1] coordinates, corner format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected object contributing to a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Persisted classification result for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRecord {
    pub media_ref: String,
    pub top_label: TopLabel,
    pub confidence: f32,
    pub created_at: String,
    pub objects: Vec<DetectedObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl LabelRecord {
    pub fn is_error(&self) -> bool {
        self.top_label == TopLabel::Error
    }

    /// Build an ERROR record carrying the failure detail.
    pub fn failed(media_ref: &str, detail: String) -> Self {
        Self {
            media_ref: media_ref.to_string(),
            top_label: TopLabel::Error,
            confidence: 0.0,
            created_at: now_rfc3339(),
            objects: Vec::new(),
            error_detail: Some(detail),
        }
    }

    /// Derive the record from detections already filtered by the confidence
    /// threshold. When several coarse categories are present the fixed
    /// precedence PERSON > ANIMAL > VEHICLE decides; the reported confidence
    /// is the maximum among the objects contributing to the chosen label.
    pub fn from_detections(media_ref: &str, objects: Vec<DetectedObject>) -> Self {
        let mut best: [Option<f32>; 3] = [None, None, None];
        for obj in &objects {
            let slot = match map_class(&obj.class) {
                Some(TopLabel::Person) => 0,
                Some(TopLabel::Animal) => 1,
                Some(TopLabel::Vehicle) => 2,
                _ => continue,
            };
            let entry = &mut best[slot];
            *entry = Some(entry.map_or(obj.confidence, |c: f32| c.max(obj.confidence)));
        }

        let (top_label, confidence) = if let Some(c) = best[0] {
            (TopLabel::Person, c)
        } else if let Some(c) = best[1] {
            (TopLabel::Animal, c)
        } else if let Some(c) = best[2] {
            (TopLabel::Vehicle, c)
        } else {
            (TopLabel::Unknown, 0.0)
        };

        Self {
            media_ref: media_ref.to_string(),
            top_label,
            confidence,
            created_at: now_rfc3339(),
            objects,
            error_detail: None,
        }
    }
}

const PERSON_CLASSES: &[&str] = &["person"];
const ANIMAL_CLASSES: &[&str] = &[
    "cat", "dog", "bird", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];
const VEHICLE_CLASSES: &[&str] = &["car", "truck", "bus", "motorcycle", "bicycle"];

/// Map a detector class name onto a coarse label, None for classes that do
/// not belong to any of the three interesting categories.
pub fn map_class(class: &str) -> Option<TopLabel> {
    let lower = class.to_ascii_lowercase();
    if PERSON_CLASSES.contains(&lower.as_str()) {
        Some(TopLabel::Person)
    } else if ANIMAL_CLASSES.contains(&lower.as_str()) {
        Some(TopLabel::Animal)
    } else if VEHICLE_CLASSES.contains(&lower.as_str()) {
        Some(TopLabel::Vehicle)
    } else {
        None
    }
}

/// RFC 3339 UTC timestamp for `createdAt` fields.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(class: &str, confidence: f32) -> DetectedObject {
        DetectedObject {
            class: class.to_string(),
            confidence,
            bounding_box: None,
        }
    }

    #[test]
    fn person_beats_higher_confidence_vehicle() {
        let record = LabelRecord::from_detections(
            "cam1/20240101/075659.mp4",
            vec![obj("car", 0.95), obj("person", 0.60)],
        );
        assert_eq!(record.top_label, TopLabel::Person);
        assert_eq!(record.confidence, 0.60);
    }

    #[test]
    fn animal_beats_vehicle() {
        let record =
            LabelRecord::from_detections("x.mp4", vec![obj("truck", 0.9), obj("dog", 0.4)]);
        assert_eq!(record.top_label, TopLabel::Animal);
        assert_eq!(record.confidence, 0.4);
    }

    #[test]
    fn confidence_is_max_within_winning_category() {
        let record = LabelRecord::from_detections(
            "x.mp4",
            vec![obj("person", 0.5), obj("person", 0.8), obj("person", 0.6)],
        );
        assert_eq!(record.top_label, TopLabel::Person);
        assert_eq!(record.confidence, 0.8);
    }

    #[test]
    fn uninteresting_classes_yield_unknown() {
        let record = LabelRecord::from_detections("x.mp4", vec![obj("bench", 0.99)]);
        assert_eq!(record.top_label, TopLabel::Unknown);
        assert_eq!(record.confidence, 0.0);
    }

    #[test]
    fn no_detections_yield_unknown() {
        let record = LabelRecord::from_detections("x.mp4", vec![]);
        assert_eq!(record.top_label, TopLabel::Unknown);
        assert_eq!(record.confidence, 0.0);
    }

    #[test]
    fn class_mapping_is_case_insensitive() {
        assert_eq!(map_class("Person"), Some(TopLabel::Person));
        assert_eq!(map_class("CAR"), Some(TopLabel::Vehicle));
        assert_eq!(map_class("giraffe"), Some(TopLabel::Animal));
        assert_eq!(map_class("laptop"), None);
    }

    #[test]
    fn serializes_screaming_snake_case_labels() {
        let record = LabelRecord::from_detections("x.mp4", vec![obj("person", 0.7)]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"topLabel\":\"PERSON\""));
        assert!(json.contains("\"mediaRef\":\"x.mp4\""));
        assert!(!json.contains("errorDetail"));
    }

    #[test]
    fn error_record_round_trips() {
        let record = LabelRecord::failed("x.mp4", "ffmpeg failed".into());
        assert!(record.is_error());
        let json = serde_json::to_string(&record).unwrap();
        let back: LabelRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.error_detail.as_deref(), Some("ffmpeg failed"));
        assert_eq!(back.top_label, TopLabel::Error);
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
