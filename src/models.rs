use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use validator::{Validate, ValidationError};

use crate::agents::extraction::InBodyExtractor;
use crate::agents::orchestrator::Pipeline;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<Pipeline>,
    pub extractor: Arc<InBodyExtractor>,
}

// ---------------------------------------------------------------------------
// Request models
// ---------------------------------------------------------------------------

pub const ALLOWED_TRAINING_MINUTES: [u16; 8] = [5, 10, 15, 30, 45, 60, 90, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Experience {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Experience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Experience::Beginner => write!(f, "beginner"),
            Experience::Intermediate => write!(f, "intermediate"),
            Experience::Advanced => write!(f, "advanced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Home,
    Gym,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Home => write!(f, "home"),
            Environment::Gym => write!(f, "gym"),
        }
    }
}

/// Skeletal muscle mass per body segment, kg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SegmentalLean {
    #[validate(range(min = 0.0))]
    pub right_arm: f64,
    #[validate(range(min = 0.0))]
    pub left_arm: f64,
    #[validate(range(min = 0.0))]
    pub trunk: f64,
    #[validate(range(min = 0.0))]
    pub right_leg: f64,
    #[validate(range(min = 0.0))]
    pub left_leg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UserProfile {
    #[validate(range(min = 10, max = 100))]
    pub age: u32,
    pub gender: Gender,
    #[validate(range(min = 100.0, max = 250.0))]
    pub height_cm: f64,
    pub training_experience: Experience,
    #[serde(default)]
    pub injuries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InBodyMetrics {
    #[validate(range(min = 30.0, max = 200.0))]
    pub weight_kg: f64,
    #[validate(range(min = 10.0, max = 100.0))]
    pub muscle_mass_kg: f64,
    #[validate(range(min = 5.0, max = 60.0))]
    pub skeletal_muscle_mass_kg: f64,
    #[validate(range(min = 3.0, max = 60.0))]
    pub body_fat_percent: f64,
    #[validate(nested)]
    pub segmental_lean: SegmentalLean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Goal {
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "goal type must not be empty"))]
    pub goal_type: String,
    /// Requested training days; empty leaves the choice to the planner
    #[serde(default, deserialize_with = "string_or_number")]
    pub days_per_week: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Preferences {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_training_minutes", deserialize_with = "minutes_from_string_or_number")]
    #[validate(custom(function = "validate_training_minutes"))]
    pub training_time_minutes: u16,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub schedule_notes: String,
    #[serde(default)]
    pub specific_requests: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            environment: Environment::Home,
            training_time_minutes: default_training_minutes(),
            equipment: String::new(),
            schedule_notes: String::new(),
            specific_requests: String::new(),
        }
    }
}

/// Input of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TrainingRequest {
    #[validate(nested)]
    pub user_profile: UserProfile,
    #[validate(nested)]
    pub inbody_metrics: InBodyMetrics,
    #[validate(nested)]
    pub goal: Goal,
    #[serde(default)]
    #[validate(nested)]
    pub preferences: Preferences,
}

fn default_training_minutes() -> u16 {
    60
}

fn validate_training_minutes(minutes: u16) -> Result<(), ValidationError> {
    if ALLOWED_TRAINING_MINUTES.contains(&minutes) {
        Ok(())
    } else {
        let mut err = ValidationError::new("training_time_minutes");
        err.message = Some(format!("must be one of {:?}", ALLOWED_TRAINING_MINUTES).into());
        Err(err)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Str(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
    })
}

fn minutes_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Int(n) => u16::try_from(n).map_err(serde::de::Error::custom),
        StringOrNumber::Str(s) => s.trim().parse::<u16>().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Structured outputs
// ---------------------------------------------------------------------------

/// Objective body-composition analysis, no training advice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
    #[validate(length(min = 1))]
    pub body_type: String,
    #[validate(length(min = 1))]
    pub body_fat_evaluation: String,
    #[validate(length(min = 1))]
    pub skeletal_muscle_evaluation: String,
    #[validate(length(min = 1))]
    pub arm_balance: String,
    #[validate(length(min = 1))]
    pub leg_balance: String,
    #[validate(length(min = 1))]
    pub upper_lower_balance: String,
    pub risk_factors: Vec<String>,
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Exercise {
    #[validate(length(min = 1))]
    pub target_area: String,
    #[validate(length(min = 1))]
    pub exercise_name: String,
    #[validate(range(min = 1))]
    pub sets: u32,
    #[validate(length(min = 1))]
    pub reps: String,
    #[serde(default = "default_interval_seconds")]
    #[validate(range(min = 1))]
    pub interval_seconds: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub instructions: Vec<String>,
}

fn default_interval_seconds() -> u32 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DayPlan {
    #[validate(length(min = 1))]
    pub day_label: String,
    #[validate(length(min = 1))]
    pub focus: String,
    #[validate(nested)]
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TrainingPlan {
    #[validate(length(min = 1))]
    pub split_method: String,
    #[validate(length(min = 1))]
    pub split_rationale: String,
    #[validate(length(min = 1, message = "weekly schedule must contain at least one day"), nested)]
    pub weekly_schedule: Vec<DayPlan>,
    pub modifications: Vec<String>,
    pub priority_points: Vec<String>,
    pub nutrition_tips: Vec<String>,
}

/// Response body of a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResponse {
    pub analysis_report: AnalysisResult,
    pub training_plan: TrainingPlan,
}

// ---------------------------------------------------------------------------
// Image extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

/// Segment values the vision model could read; unreadable ones stay empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSegmentalLean {
    pub right_arm: Option<f64>,
    pub left_arm: Option<f64>,
    pub trunk: Option<f64>,
    pub right_leg: Option<f64>,
    pub left_leg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct InBodyExtraction {
    #[validate(range(min = 0.0))]
    pub weight_kg: Option<f64>,
    #[validate(range(min = 0.0))]
    pub muscle_mass_kg: Option<f64>,
    #[validate(range(min = 0.0))]
    pub skeletal_muscle_mass_kg: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub body_fat_percent: Option<f64>,
    pub segmental_lean: Option<ExtractedSegmentalLean>,
    #[serde(default)]
    pub confidence: Confidence,
    pub notes: Option<String>,
}
