//! Prediction results as they are returned to callers and written to the log.
//!
//! A [`Record`] is either a result or a failure, always with the image it
//! came from and a timestamp. On the wire it is one flat JSON object:
//! `{"success": true, "predicted_class": ..., "image_path": ..., "timestamp": ...}`
//! or `{"success": false, "error": ..., "error_kind": ..., "filename": ..., "timestamp": ...}`.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use vista_core::{ClassIndex, ErrorKind, PreprocessError};
use vista_model::{ModelError, Prediction};

/// Where a predicted image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    ImagePath(PathBuf),
    Filename(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl PredictionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PredictionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<ModelError> for PredictionFailure {
    fn from(e: ModelError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<PreprocessError> for PredictionFailure {
    fn from(e: PreprocessError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Record<T> {
    pub outcome: Result<T, PredictionFailure>,
    pub origin: ImageOrigin,
    pub timestamp: DateTime<Local>,
}

impl<T> Record<T> {
    pub fn new(outcome: Result<T, PredictionFailure>, origin: ImageOrigin) -> Self {
        Self {
            outcome,
            origin,
            timestamp: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&PredictionFailure> {
        self.outcome.as_ref().err()
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireBody<'a, T> {
    Ok(&'a T),
    Err {
        error: &'a str,
        error_kind: ErrorKind,
    },
}

#[derive(Serialize)]
struct Wire<'a, T> {
    success: bool,
    #[serde(flatten)]
    body: WireBody<'a, T>,
    #[serde(flatten)]
    origin: &'a ImageOrigin,
    timestamp: &'a DateTime<Local>,
}

impl<T: Serialize> Serialize for Record<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match &self.outcome {
            Ok(value) => WireBody::Ok(value),
            Err(failure) => WireBody::Err {
                error: &failure.message,
                error_kind: failure.kind,
            },
        };
        Wire {
            success: self.is_success(),
            body,
            origin: &self.origin,
            timestamp: &self.timestamp,
        }
        .serialize(serializer)
    }
}

/// Best class of one image, with every class probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub predicted_class: String,
    pub predicted_index: usize,
    pub confidence: f32,
    /// In class index order
    #[serde(serialize_with = "ordered_map")]
    pub probabilities: Vec<(String, f32)>,
}

fn ordered_map<S: Serializer>(entries: &[(String, f32)], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (name, p) in entries {
        map.serialize_entry(name, p)?;
    }
    map.end()
}

fn class_name(index: &ClassIndex, idx: usize) -> Result<String, ModelError> {
    index
        .name(idx)
        .map(str::to_string)
        .ok_or_else(|| ModelError::Output(format!("class index {idx} has no name")))
}

impl Classification {
    pub fn from_prediction(
        prediction: &Prediction,
        index: &ClassIndex,
    ) -> Result<Self, ModelError> {
        let probabilities = prediction
            .probabilities
            .iter()
            .enumerate()
            .map(|(i, p)| Ok((class_name(index, i)?, *p)))
            .collect::<Result<Vec<_>, ModelError>>()?;

        Ok(Self {
            predicted_class: class_name(index, prediction.class_index)?,
            predicted_index: prediction.class_index,
            confidence: prediction.confidence,
            probabilities,
        })
    }

    pub fn probability_of(&self, class: &str) -> Option<f32> {
        self.probabilities
            .iter()
            .find(|(name, _)| name == class)
            .map(|(_, p)| *p)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassProbability {
    pub class: String,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopK {
    pub top_predictions: Vec<ClassProbability>,
}

impl TopK {
    /// The `k` most probable classes, highest first. Equal probabilities keep class index order.
    pub fn from_classification(classification: &Classification, k: usize) -> Self {
        let mut ranked: Vec<ClassProbability> = classification
            .probabilities
            .iter()
            .map(|(class, probability)| ClassProbability {
                class: class.clone(),
                probability: *probability,
            })
            .collect();
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        ranked.truncate(k);
        Self {
            top_predictions: ranked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Confident,
    Uncertain,
}

impl PredictionStatus {
    pub fn is_confident(&self) -> bool {
        matches!(self, Self::Confident)
    }
}

/// A classification annotated against a confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholded {
    #[serde(flatten)]
    pub classification: Classification,
    pub prediction_status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Thresholded {
    pub fn new(classification: Classification, threshold: f32) -> Self {
        if classification.confidence < threshold {
            let message = format!(
                "Confidence {:.2}% below threshold {:.2}%",
                classification.confidence * 100.0,
                threshold * 100.0
            );
            Self {
                classification,
                prediction_status: PredictionStatus::Uncertain,
                message: Some(message),
            }
        } else {
            Self {
                classification,
                prediction_status: PredictionStatus::Confident,
                message: None,
            }
        }
    }
}

pub type PredictionRecord = Record<Classification>;
pub type TopKRecord = Record<TopK>;
pub type ThresholdRecord = Record<Thresholded>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn classification() -> Classification {
        let index = ClassIndex::from_names(["cat", "dog", "fox"]).unwrap();
        let prediction = Prediction {
            class_index: 1,
            confidence: 0.5,
            probabilities: vec![0.25, 0.5, 0.25],
        };
        Classification::from_prediction(&prediction, &index).unwrap()
    }

    #[test]
    fn test_success_wire_shape() {
        let record = Record::new(Ok(classification()), ImageOrigin::Filename("pet.png".into()));
        let json: Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["predicted_class"], "dog");
        assert_eq!(json["predicted_index"], 1);
        assert_eq!(json["probabilities"]["fox"], 0.25);
        assert_eq!(json["filename"], "pet.png");
        assert!(json.get("error").is_none());
        assert!(json["timestamp"].is_string());

        // Map keys keep class index order
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.find("\"cat\"").unwrap() < text.find("\"fox\"").unwrap());
    }

    #[test]
    fn test_failure_wire_shape() {
        let failure = PredictionFailure::new(ErrorKind::InvalidImage, "cannot decode");
        let record: PredictionRecord =
            Record::new(Err(failure), ImageOrigin::ImagePath("x/y.png".into()));
        let json: Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "cannot decode");
        assert_eq!(json["error_kind"], "invalid_image");
        assert_eq!(json["image_path"], "x/y.png");
        assert!(json.get("predicted_class").is_none());
    }

    #[test]
    fn test_top_k_stable_order() {
        let top = TopK::from_classification(&classification(), 2);
        let classes: Vec<_> = top.top_predictions.iter().map(|c| c.class.as_str()).collect();
        assert_eq!(classes, ["dog", "cat"]);

        let all = TopK::from_classification(&classification(), 10);
        assert_eq!(all.top_predictions.len(), 3);
        assert_eq!(all.top_predictions[2].class, "fox");
    }

    #[test]
    fn test_threshold_annotation() {
        let uncertain = Thresholded::new(classification(), 0.6);
        assert_eq!(uncertain.prediction_status, PredictionStatus::Uncertain);
        assert_eq!(
            uncertain.message.as_deref(),
            Some("Confidence 50.00% below threshold 60.00%")
        );
        assert_eq!(uncertain.classification, classification());

        let confident = Thresholded::new(classification(), 0.5);
        assert!(confident.prediction_status.is_confident());

        let json = serde_json::to_value(&confident).unwrap();
        assert_eq!(json["prediction_status"], "confident");
        assert_eq!(json["predicted_class"], "dog");
        assert!(json.get("message").is_none());
    }
}
