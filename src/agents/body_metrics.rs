//! Deterministic body-composition metrics used by the analyzer tools.
//!
//! The typed functions return `MetricError` on bad input; the `evaluate_*`
//! and `classify_*` wrappers render results (and errors) as the text the
//! model reads, so invalid measurements never abort a stage.

use std::fmt;

use crate::models::Gender;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("skeletal muscle mass and weight must be positive values")]
    NonPositiveMuscleInput,
    #[error("weight and height must be positive and body fat must not be negative")]
    NonPositiveBodyInput,
    #[error("sex must be \"male\" or \"female\", got \"{0}\"")]
    UnsupportedSex(String),
}

pub fn parse_sex(value: &str) -> Result<Gender, MetricError> {
    match value.trim().to_lowercase().as_str() {
        "male" => Ok(Gender::Male),
        "female" => Ok(Gender::Female),
        _ => Err(MetricError::UnsupportedSex(value.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuscleRating {
    Excellent,
    Standard,
    Insufficient,
}

impl fmt::Display for MuscleRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MuscleRating::Excellent => "excellent",
            MuscleRating::Standard => "standard",
            MuscleRating::Insufficient => "insufficient",
        };
        f.write_str(label)
    }
}

/// Skeletal muscle mass as a percentage of body weight
pub fn muscle_ratio(
    skeletal_muscle_mass_kg: f64,
    weight_kg: f64,
    sex: Gender,
) -> Result<(f64, MuscleRating), MetricError> {
    if skeletal_muscle_mass_kg <= 0.0 || weight_kg <= 0.0 {
        return Err(MetricError::NonPositiveMuscleInput);
    }
    let ratio = skeletal_muscle_mass_kg / weight_kg * 100.0;
    let (excellent, standard) = match sex {
        Gender::Male => (45.0, 39.0),
        Gender::Female => (40.0, 34.0),
    };
    let rating = if ratio >= excellent {
        MuscleRating::Excellent
    } else if ratio >= standard {
        MuscleRating::Standard
    } else {
        MuscleRating::Insufficient
    };
    Ok((ratio, rating))
}

pub fn evaluate_muscle_ratio(skeletal_muscle_mass_kg: f64, weight_kg: f64, sex: &str) -> String {
    let result = parse_sex(sex).and_then(|sex| {
        muscle_ratio(skeletal_muscle_mass_kg, weight_kg, sex).map(|(ratio, rating)| (sex, ratio, rating))
    });
    match result {
        Ok((sex, ratio, rating)) => {
            format!("Skeletal muscle ratio: {:.1}% ({}: {})", ratio, sex, rating)
        }
        Err(e) => format!("Error: {}.", e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Underweight,
    SlightlyUnderweight,
    Lean,
    MuscularLean,
    Proper,
    Muscular,
    Athletic,
    HiddenObesity,
    SlightlyOverweight,
    Overweight,
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BodyType::Underweight => "underweight",
            BodyType::SlightlyUnderweight => "slightly-underweight",
            BodyType::Lean => "lean",
            BodyType::MuscularLean => "muscular-lean",
            BodyType::Proper => "proper",
            BodyType::Muscular => "muscular",
            BodyType::Athletic => "athletic",
            BodyType::HiddenObesity => "hidden-obesity",
            BodyType::SlightlyOverweight => "slightly-overweight",
            BodyType::Overweight => "overweight",
        };
        f.write_str(label)
    }
}

pub fn bmi(weight_kg: f64, height_cm: f64) -> f64 {
    let height_m = height_cm / 100.0;
    weight_kg / (height_m * height_m)
}

/// InBody body-type matrix: BMI band crossed with sex-specific body-fat bands.
/// Returns the type and the BMI it was derived from.
pub fn body_type(
    weight_kg: f64,
    height_cm: f64,
    body_fat_percent: f64,
    sex: Gender,
) -> Result<(BodyType, f64), MetricError> {
    if weight_kg <= 0.0 || height_cm <= 0.0 || body_fat_percent < 0.0 {
        return Err(MetricError::NonPositiveBodyInput);
    }

    let bmi = bmi(weight_kg, height_cm);
    let bf = body_fat_percent;
    // Female bands sit 8 points above the male ones
    let shift = match sex {
        Gender::Male => 0.0,
        Gender::Female => 8.0,
    };
    let (very_low, low, mid) = (10.0 + shift, 15.0 + shift, 20.0 + shift);

    let kind = if bmi >= 25.0 {
        if bf < low {
            BodyType::Athletic
        } else if bf < mid {
            BodyType::SlightlyOverweight
        } else {
            BodyType::Overweight
        }
    } else if bmi >= 21.75 {
        if bf < low {
            BodyType::Muscular
        } else if bf < mid {
            BodyType::Proper
        } else {
            BodyType::SlightlyOverweight
        }
    } else if bmi >= 18.5 {
        if bf < very_low {
            BodyType::MuscularLean
        } else if bf < low {
            BodyType::Lean
        } else if bf < mid {
            BodyType::Proper
        } else {
            BodyType::HiddenObesity
        }
    } else if bf < very_low {
        BodyType::Underweight
    } else if bf < mid {
        BodyType::SlightlyUnderweight
    } else {
        BodyType::HiddenObesity
    };

    Ok((kind, bmi))
}

pub fn classify_body_type(weight_kg: f64, height_cm: f64, body_fat_percent: f64, sex: &str) -> String {
    let result = parse_sex(sex).and_then(|sex| body_type(weight_kg, height_cm, body_fat_percent, sex));
    match result {
        Ok((kind, bmi)) => format!(
            "Body type: {} (BMI: {:.1}, body fat: {:.1}%)",
            kind, bmi, body_fat_percent
        ),
        Err(e) => format!("Error: {}.", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(weight: f64, height: f64, bf: f64, sex: Gender) -> BodyType {
        body_type(weight, height, bf, sex).unwrap().0
    }

    #[test]
    fn test_muscle_ratio_reference_case() {
        assert_eq!(
            evaluate_muscle_ratio(28.0, 70.0, "male"),
            "Skeletal muscle ratio: 40.0% (male: standard)"
        );
    }

    #[test]
    fn test_muscle_ratio_thresholds() {
        assert_eq!(muscle_ratio(45.0, 100.0, Gender::Male).unwrap().1, MuscleRating::Excellent);
        assert_eq!(muscle_ratio(44.9, 100.0, Gender::Male).unwrap().1, MuscleRating::Standard);
        assert_eq!(muscle_ratio(38.9, 100.0, Gender::Male).unwrap().1, MuscleRating::Insufficient);
        assert_eq!(muscle_ratio(40.0, 100.0, Gender::Female).unwrap().1, MuscleRating::Excellent);
        assert_eq!(muscle_ratio(34.0, 100.0, Gender::Female).unwrap().1, MuscleRating::Standard);
        assert_eq!(muscle_ratio(33.9, 100.0, Gender::Female).unwrap().1, MuscleRating::Insufficient);
    }

    #[test]
    fn test_muscle_ratio_errors_are_text() {
        assert!(evaluate_muscle_ratio(0.0, 70.0, "male").starts_with("Error:"));
        assert!(evaluate_muscle_ratio(28.0, -1.0, "female").starts_with("Error:"));
        assert!(evaluate_muscle_ratio(28.0, 70.0, "other").contains("sex must be"));
    }

    #[test]
    fn test_body_type_male_matrix() {
        // 200 cm: BMI = weight / 4
        assert_eq!(kind(104.0, 200.0, 14.9, Gender::Male), BodyType::Athletic);
        assert_eq!(kind(104.0, 200.0, 19.9, Gender::Male), BodyType::SlightlyOverweight);
        assert_eq!(kind(104.0, 200.0, 20.0, Gender::Male), BodyType::Overweight);
        assert_eq!(kind(92.0, 200.0, 14.0, Gender::Male), BodyType::Muscular);
        assert_eq!(kind(80.0, 200.0, 9.9, Gender::Male), BodyType::MuscularLean);
        assert_eq!(kind(80.0, 200.0, 10.0, Gender::Male), BodyType::Lean);
        assert_eq!(kind(80.0, 200.0, 15.0, Gender::Male), BodyType::Proper);
        assert_eq!(kind(80.0, 200.0, 20.0, Gender::Male), BodyType::HiddenObesity);
        assert_eq!(kind(72.0, 200.0, 9.0, Gender::Male), BodyType::Underweight);
        assert_eq!(kind(72.0, 200.0, 19.9, Gender::Male), BodyType::SlightlyUnderweight);
        assert_eq!(kind(72.0, 200.0, 20.0, Gender::Male), BodyType::HiddenObesity);
    }

    #[test]
    fn test_body_type_female_matrix() {
        assert_eq!(kind(104.0, 200.0, 22.9, Gender::Female), BodyType::Athletic);
        assert_eq!(kind(104.0, 200.0, 27.9, Gender::Female), BodyType::SlightlyOverweight);
        assert_eq!(kind(104.0, 200.0, 28.0, Gender::Female), BodyType::Overweight);
        assert_eq!(kind(92.0, 200.0, 23.0, Gender::Female), BodyType::Proper);
        assert_eq!(kind(92.0, 200.0, 28.0, Gender::Female), BodyType::SlightlyOverweight);
        assert_eq!(kind(80.0, 200.0, 17.9, Gender::Female), BodyType::MuscularLean);
        assert_eq!(kind(80.0, 200.0, 22.9, Gender::Female), BodyType::Lean);
        assert_eq!(kind(80.0, 200.0, 27.9, Gender::Female), BodyType::Proper);
        assert_eq!(kind(80.0, 200.0, 28.0, Gender::Female), BodyType::HiddenObesity);
        assert_eq!(kind(72.0, 200.0, 17.9, Gender::Female), BodyType::Underweight);
        assert_eq!(kind(72.0, 200.0, 27.9, Gender::Female), BodyType::SlightlyUnderweight);
    }

    #[test]
    fn test_bmi_boundary_at_21_75() {
        // 87 kg at 200 cm is exactly 21.75
        assert_eq!(bmi(87.0, 200.0), 21.75);
        assert_eq!(kind(87.0, 200.0, 19.9, Gender::Male), BodyType::Proper);
        assert_eq!(kind(87.0, 200.0, 20.0, Gender::Male), BodyType::SlightlyOverweight);
    }

    #[test]
    fn test_classify_renders_text() {
        assert_eq!(
            classify_body_type(87.0, 200.0, 19.9, "Male"),
            "Body type: proper (BMI: 21.8, body fat: 19.9%)"
        );
        assert!(classify_body_type(70.0, 0.0, 20.0, "male").starts_with("Error:"));
        assert!(classify_body_type(70.0, 170.0, -1.0, "male").starts_with("Error:"));
        assert!(classify_body_type(70.0, 170.0, 20.0, "unknown").starts_with("Error:"));
    }
}
