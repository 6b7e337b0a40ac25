use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of labels an emotion classifier may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label '{0}'")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

// Serialized as the lowercase label so it can be used as a JSON object key.
impl Serialize for Emotion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Emotion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-label confidence values, kept in the order the classifier reported them.
///
/// Values are relative confidences; they are not required to sum to 1 (DeepFace
/// reports percentages).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionScores(IndexMap<Emotion, f64>);

impl EmotionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a score. Replacing keeps the label's original position.
    pub fn insert(&mut self, emotion: Emotion, score: f64) {
        self.0.insert(emotion, score);
    }

    pub fn get(&self, emotion: Emotion) -> Option<f64> {
        self.0.get(&emotion).copied()
    }

    pub fn contains(&self, emotion: Emotion) -> bool {
        self.0.contains_key(&emotion)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        self.0.iter().map(|(e, s)| (*e, *s))
    }

    /// Label with the highest score. The earliest label wins ties.
    pub fn dominant(&self) -> Option<Emotion> {
        let mut best: Option<(Emotion, f64)> = None;
        for (emotion, score) in self.iter() {
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((emotion, score)),
            }
        }
        best.map(|(e, _)| e)
    }

    /// Stable textual form used for storage: a JSON object in insertion order.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl FromIterator<(Emotion, f64)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (Emotion, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultError {
    #[error("dominant emotion '{0}' is missing from the score map")]
    DominantNotScored(Emotion),
    #[error("score map is empty")]
    NoScores,
}

/// Canonical classifier output for one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionResult {
    dominant_emotion: Emotion,
    emotion_scores: EmotionScores,
}

impl EmotionResult {
    /// Build a result, enforcing that the dominant label is present in `scores`.
    pub fn new(dominant_emotion: Emotion, emotion_scores: EmotionScores) -> Result<Self, ResultError> {
        if emotion_scores.is_empty() {
            return Err(ResultError::NoScores);
        }
        if !emotion_scores.contains(dominant_emotion) {
            return Err(ResultError::DominantNotScored(dominant_emotion));
        }
        Ok(Self {
            dominant_emotion,
            emotion_scores,
        })
    }

    pub fn dominant_emotion(&self) -> Emotion {
        self.dominant_emotion
    }

    pub fn emotion_scores(&self) -> &EmotionScores {
        &self.emotion_scores
    }

    pub fn into_parts(self) -> (Emotion, EmotionScores) {
        (self.dominant_emotion, self.emotion_scores)
    }
}
