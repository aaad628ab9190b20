//! Planner Stage
//!
//! Turns the analysis report into a weekly `TrainingPlan`. The model pulls
//! training strategy and risk substitutions from the knowledge base, then a
//! schema-constrained call produces the plan. Plans that ignore the time
//! budget or the training environment are rejected before they reach the state.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::analyzer::knowledge_context;
use super::graph::{parse_arguments, Finalizer, Tool, ToolAgentGraph, ToolSet};
use super::state::AgentState;
use super::structured::request_structured;
use crate::llm::LLM;
use crate::models::{AnalysisResult, Environment, Preferences, TrainingPlan, TrainingRequest};
use crate::retrieval::{RetrievalService, DEFAULT_DIVERSITY};
use crate::types::{AppError, AppResult, ToolSpec};

pub const STAGE: &str = "planner";

pub const DIRECTIVE: &str = r#"You are a personal trainer with expertise in exercise physiology and sports medicine.

## Task
Create a personalised training programme from the user's InBody analysis.

## Inputs
1. User profile (age, sex, training experience, injuries)
2. InBody measurements (weight, muscle mass, body fat, segmental skeletal muscle)
3. Goal (fat loss, hypertrophy, general fitness, ...)
4. Analysis report (body type, balance ratings, risk factors)

## Procedure
1. Call training_retriever_tool ONCE, merging into one query:
   - training approach for the body type
   - strategy for the goal
   - split suited to the experience level
2. Call risk_modification_tool with the risk factors to find countermeasures.
3. Design the weekly plan from the search results.

## Design rules
- TOP PRIORITY: honour the user's preferences (environment, equipment, requests, session length).
  - home training: no gym machines (no machine, cable, smith machine, leg press or lat pulldown)
  - no barbell unless a barbell is listed as available equipment
  - scale the number of exercises to the session length
- Exercises per training day by session length:
  - 5-15 minutes: 2-4 exercises (warm-up included)
  - 30 minutes: 5-7 exercises
  - 45 minutes: 7-9 exercises
  - 60 minutes: 8-12 exercises
  - 90 minutes or more: 12-15 exercises
  - account for explanations and rest between sets when choosing the count
- Rest between sets (interval_seconds) by intensity:
  - stretches and light movements: 30 seconds
  - standard movements (push-ups, squats, crunches): 60 seconds
  - heavy or compound lifts: 90-120 seconds
- BEGINNERS: use only familiar, well-known exercises
  - squats, push-ups, crunches, back extensions, planks, high knees, calf raises, stretches
  - plain names, no jargon
  - avoid movements that need complex technique
- Intermediate and advanced users may get specialised exercises.
- Every exercise gets about three concrete steps in instructions, in plain words:
  "1. Do X", "2. Do Y", "3. Do Z".
- Follow the requested training days per week. If none is given, choose the best number for the experience, goal and body type.
- Offer substitute exercises for body parts affected by risk factors.
- Include unilateral exercises when left/right balance is off."#;

const TRAINING_K: usize = 4;
const TRAINING_FETCH_K: usize = 12;

const RISK_K: usize = 3;
const RISK_FETCH_K: usize = 8;
const RISK_DIVERSITY: f32 = 0.6;

pub struct TrainingRetrieverTool {
    retrieval: Arc<RetrievalService>,
}

impl TrainingRetrieverTool {
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self { retrieval }
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[async_trait]
impl Tool for TrainingRetrieverTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "training_retriever_tool".to_string(),
            description: "Search training knowledge: body-type strategies (metabolism, nutrition, cardio), \
                exercise lookup (\"leg training at home\", \"dumbbell back exercises\", \"beginner staples\"), \
                joint, metabolic and hormonal risk management, progression models from linear to \
                periodisation, recovery, supplements and imbalance. \
                Example: \"3 days a week beginner full body recovery protein\"."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> AppResult<String> {
        let args: QueryArgs = match parse_arguments("training_retriever_tool", arguments) {
            Ok(args) => args,
            Err(message) => return Ok(message),
        };
        self.retrieval
            .search(&args.query, TRAINING_K, TRAINING_FETCH_K, DEFAULT_DIVERSITY)
            .await
    }
}

pub struct RiskModificationTool {
    retrieval: Arc<RetrievalService>,
}

impl RiskModificationTool {
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self { retrieval }
    }

    pub fn query_for(risk_factors: &str) -> String {
        format!("risk mitigation substitute exercises {}", risk_factors)
    }
}

#[derive(Deserialize)]
struct RiskArgs {
    risk_factors: String,
}

#[async_trait]
impl Tool for RiskModificationTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "risk_modification_tool".to_string(),
            description: "Find exercise changes and substitutes for risk factors. Handles lower back pain \
                (deadlift alternatives, core strengthening), knee problems (squat alternatives) and \
                shoulder problems (overhead press alternatives, rotator cuff work)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "risk_factors": {
                        "type": "string",
                        "description": "Comma-separated risk factors, e.g. \"knee pain, lower back pain\""
                    }
                },
                "required": ["risk_factors"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> AppResult<String> {
        let args: RiskArgs = match parse_arguments("risk_modification_tool", arguments) {
            Ok(args) => args,
            Err(message) => return Ok(message),
        };
        self.retrieval
            .search(&Self::query_for(&args.risk_factors), RISK_K, RISK_FETCH_K, RISK_DIVERSITY)
            .await
    }
}

/// Inclusive exercise-count range for a training day of the given length
pub fn exercise_count_range(training_minutes: u16) -> (usize, usize) {
    match training_minutes {
        0..=15 => (2, 4),
        16..=30 => (5, 7),
        31..=45 => (7, 9),
        46..=60 => (8, 12),
        _ => (12, 15),
    }
}

const MACHINE_TERMS: [&str; 6] = ["machine", "cable", "smith", "leg press", "lat pulldown", "pec deck"];

fn is_rest_day(day: &crate::models::DayPlan) -> bool {
    let focus = day.focus.to_lowercase();
    let label = day.day_label.to_lowercase();
    day.exercises.is_empty() || focus.contains("rest") || label.contains("rest")
}

fn barbell_available(preferences: &Preferences) -> bool {
    let equipment = preferences.equipment.to_lowercase();
    if equipment.contains("barbell") {
        return true;
    }
    preferences.environment == Environment::Gym && equipment.trim().is_empty()
}

/// Constraint violations of a plan against the user's preferences
pub fn check_plan(plan: &TrainingPlan, preferences: &Preferences) -> Vec<String> {
    let (min, max) = exercise_count_range(preferences.training_time_minutes);
    let forbid_machines = preferences.environment == Environment::Home;
    let forbid_barbell = !barbell_available(preferences);
    let mut violations = Vec::new();

    for day in &plan.weekly_schedule {
        if is_rest_day(day) {
            continue;
        }
        let count = day.exercises.len();
        if count < min || count > max {
            violations.push(format!(
                "{} has {} exercises, expected {}-{} for a {}-minute session",
                day.day_label, count, min, max, preferences.training_time_minutes
            ));
        }

        for exercise in &day.exercises {
            // Notes count too: "use the leg extension machine" is a machine exercise
            let text = format!("{} {}", exercise.exercise_name, exercise.notes).to_lowercase();
            if forbid_machines {
                if let Some(term) = MACHINE_TERMS.iter().find(|t| text.contains(*t)) {
                    violations.push(format!(
                        "{}: '{}' needs gym equipment ({}) but training is at home",
                        day.day_label, exercise.exercise_name, term
                    ));
                }
            }
            if forbid_barbell && text.contains("barbell") {
                violations.push(format!(
                    "{}: '{}' needs a barbell, which is not available",
                    day.day_label, exercise.exercise_name
                ));
            }
        }
    }
    violations
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// The instruction the adapter puts in front of the planner
pub fn planning_request_message(input: &TrainingRequest, report: &AnalysisResult) -> String {
    let profile = &input.user_profile;
    let metrics = &input.inbody_metrics;
    let prefs = &input.preferences;

    format!(
        "Create a training programme from the analysis below.

## User profile
- Age: {age}
- Sex: {sex}
- Training experience: {experience}
- Injuries / medical history: {injuries}

## InBody summary
- Weight: {weight} kg
- Skeletal muscle mass: {smm} kg
- Body fat: {bf}%

## Goal
- Goal type: {goal}
- Training days per week: {days}

## Preferences
- Environment: {environment}
- Session length: {minutes} minutes
- Equipment: {equipment}
- Schedule: {schedule}
- Other requests: {requests}

## Analysis report
- Body type: {body_type}
- Body fat rating: {body_fat}
- Skeletal muscle rating: {muscle}
- Arm balance: {arms}
- Leg balance: {legs}
- Upper/lower balance: {upper_lower}
- Risk factors: {risks}
- Concerns: {concerns}

Propose a training split and a concrete programme.",
        age = profile.age,
        sex = profile.gender,
        experience = profile.training_experience,
        injuries = list_or_none(&profile.injuries),
        weight = metrics.weight_kg,
        smm = metrics.skeletal_muscle_mass_kg,
        bf = metrics.body_fat_percent,
        goal = input.goal.goal_type,
        days = or_default(&input.goal.days_per_week, "unspecified (choose the best number)"),
        environment = prefs.environment,
        minutes = prefs.training_time_minutes,
        equipment = or_default(&prefs.equipment, "not specified"),
        schedule = or_default(&prefs.schedule_notes, "none"),
        requests = or_default(&prefs.specific_requests, "none"),
        body_type = report.body_type,
        body_fat = report.body_fat_evaluation,
        muscle = report.skeletal_muscle_evaluation,
        arms = report.arm_balance,
        legs = report.leg_balance,
        upper_lower = report.upper_lower_balance,
        risks = list_or_none(&report.risk_factors),
        concerns = list_or_none(&report.concerns),
    )
}

pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "split_method": {"type": "string", "description": "Split (full body, upper/lower, ...)"},
            "split_rationale": {"type": "string", "description": "Why this split was chosen"},
            "weekly_schedule": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "day_label": {"type": "string", "description": "e.g. \"Day 1\" or \"Monday\""},
                        "focus": {"type": "string"},
                        "exercises": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "target_area": {"type": "string"},
                                    "exercise_name": {"type": "string"},
                                    "sets": {"type": "integer", "minimum": 1},
                                    "reps": {"type": "string", "description": "e.g. \"8-12\""},
                                    "interval_seconds": {"type": "integer", "minimum": 1, "description": "Rest between sets, e.g. 30, 60, 90"},
                                    "notes": {"type": "string"},
                                    "instructions": {"type": "array", "items": {"type": "string"}, "description": "About three numbered steps"}
                                },
                                "required": ["target_area", "exercise_name", "sets", "reps"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["day_label", "focus", "exercises"],
                    "additionalProperties": false
                }
            },
            "modifications": {"type": "array", "items": {"type": "string"}, "description": "Risk-based changes and substitutes"},
            "priority_points": {"type": "array", "items": {"type": "string"}},
            "nutrition_tips": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["split_method", "split_rationale", "weekly_schedule", "modifications", "priority_points", "nutrition_tips"],
        "additionalProperties": false
    })
}

/// Produces the `TrainingPlan` from retrieved knowledge and the analysis report
pub struct PlanFinalizer {
    llm: LLM,
    enforce_constraints: bool,
}

impl PlanFinalizer {
    pub fn new(llm: LLM, enforce_constraints: bool) -> Self {
        Self {
            llm,
            enforce_constraints,
        }
    }

    fn prompt(state: &AgentState, report: &AnalysisResult) -> String {
        let input = state.input();
        let profile = &input.user_profile;
        let prefs = &input.preferences;
        let (min, max) = exercise_count_range(prefs.training_time_minutes);

        format!(
            "Create a training plan from the information below.

## Expert knowledge (search results)
{context}

## User summary
- Age: {age}, sex: {sex}
- Training experience: {experience}
- Goal: {goal}, days per week: {days}
- Preferences: environment {environment}, {minutes} minutes per session ({min}-{max} exercises per training day), equipment: {equipment}, schedule: {schedule}, requests: {requests}

## Analysis
- Body type: {body_type}
- Risk factors: {risks}
- Balance: arms = {arms}, legs = {legs}

Based on the above, output a concrete weekly training plan as structured data.",
            context = knowledge_context(state),
            age = profile.age,
            sex = profile.gender,
            experience = profile.training_experience,
            goal = input.goal.goal_type,
            days = or_default(&input.goal.days_per_week, "unspecified"),
            environment = prefs.environment,
            minutes = prefs.training_time_minutes,
            min = min,
            max = max,
            equipment = or_default(&prefs.equipment, "not specified"),
            schedule = or_default(&prefs.schedule_notes, "none"),
            requests = or_default(&prefs.specific_requests, "none"),
            body_type = report.body_type,
            risks = list_or_none(&report.risk_factors),
            arms = report.arm_balance,
            legs = report.leg_balance,
        )
    }
}

#[async_trait]
impl Finalizer for PlanFinalizer {
    type Output = TrainingPlan;

    async fn finalize(&self, state: &AgentState) -> AppResult<TrainingPlan> {
        let report = state
            .analysis_report()
            .ok_or_else(|| AppError::EmptyResult("planner started without an analysis report".to_string()))?;

        let plan: TrainingPlan =
            request_structured(&self.llm, STAGE, Self::prompt(state, report), "TrainingPlan", plan_schema()).await?;

        if self.enforce_constraints {
            let violations = check_plan(&plan, &state.input().preferences);
            if !violations.is_empty() {
                warn!(stage = STAGE, violations = violations.len(), "Plan violates user constraints");
                return Err(AppError::StructuredOutput {
                    stage: STAGE.to_string(),
                    reason: violations.join("; "),
                });
            }
        }
        Ok(plan)
    }

    fn commit(&self, state: &mut AgentState, output: TrainingPlan) -> AppResult<()> {
        state.set_training_plan(output)
    }
}

pub fn build_planner(
    llm: LLM,
    retrieval: Arc<RetrievalService>,
    max_turns: usize,
    enforce_constraints: bool,
) -> AppResult<ToolAgentGraph<PlanFinalizer>> {
    let tools = ToolSet::new(vec![
        Arc::new(TrainingRetrieverTool::new(retrieval.clone())) as Arc<dyn Tool>,
        Arc::new(RiskModificationTool::new(retrieval)),
    ])?;
    Ok(ToolAgentGraph::new(
        STAGE,
        DIRECTIVE,
        tools,
        llm.clone(),
        PlanFinalizer::new(llm, enforce_constraints),
        max_turns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayPlan, Exercise};

    fn exercise(name: &str) -> Exercise {
        Exercise {
            target_area: "full body".into(),
            exercise_name: name.into(),
            sets: 3,
            reps: "10-15".into(),
            interval_seconds: 60,
            notes: String::new(),
            instructions: vec!["1. Stand".into(), "2. Move".into(), "3. Return".into()],
        }
    }

    fn plan(days: Vec<DayPlan>) -> TrainingPlan {
        TrainingPlan {
            split_method: "full body".into(),
            split_rationale: "beginner".into(),
            weekly_schedule: days,
            modifications: vec![],
            priority_points: vec![],
            nutrition_tips: vec![],
        }
    }

    fn day(label: &str, names: &[&str]) -> DayPlan {
        DayPlan {
            day_label: label.into(),
            focus: "full body".into(),
            exercises: names.iter().map(|n| exercise(n)).collect(),
        }
    }

    fn home_30() -> Preferences {
        Preferences {
            training_time_minutes: 30,
            ..Preferences::default()
        }
    }

    #[test]
    fn test_exercise_count_table() {
        assert_eq!(exercise_count_range(5), (2, 4));
        assert_eq!(exercise_count_range(15), (2, 4));
        assert_eq!(exercise_count_range(30), (5, 7));
        assert_eq!(exercise_count_range(45), (7, 9));
        assert_eq!(exercise_count_range(60), (8, 12));
        assert_eq!(exercise_count_range(90), (12, 15));
        assert_eq!(exercise_count_range(120), (12, 15));
    }

    #[test]
    fn test_check_plan_accepts_home_plan() {
        let names = ["Squat", "Push-up", "Plank", "Crunch", "Calf raise"];
        let rest = DayPlan {
            day_label: "Day 2".into(),
            focus: "Rest".into(),
            exercises: vec![],
        };
        let p = plan(vec![day("Day 1", &names), rest, day("Day 3", &names)]);
        assert!(check_plan(&p, &home_30()).is_empty());
    }

    #[test]
    fn test_check_plan_flags_count_and_equipment() {
        let p = plan(vec![day("Day 1", &["Squat", "Leg press machine", "Barbell row"])]);
        let violations = check_plan(&p, &home_30());
        assert_eq!(violations.len(), 3);
        assert!(violations[0].contains("expected 5-7"));
    }

    #[test]
    fn test_check_plan_reads_exercise_notes() {
        let mut d = day("Day 1", &["Squat", "Knee extension", "Push-up", "Plank", "Calf raise"]);
        d.exercises[0].notes = "Load a barbell on the upper back".into();
        d.exercises[1].notes = "Use the leg extension machine".into();

        let violations = check_plan(&plan(vec![d]), &home_30());
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.contains("barbell")));
        assert!(violations.iter().any(|v| v.contains("Knee extension")));
    }

    #[test]
    fn test_gym_allows_machines_and_barbell() {
        let prefs = Preferences {
            environment: Environment::Gym,
            training_time_minutes: 15,
            ..Preferences::default()
        };
        let p = plan(vec![day("Day 1", &["Cable row", "Barbell squat"])]);
        assert!(check_plan(&p, &prefs).is_empty());

        let dumbbells_only = Preferences {
            equipment: "dumbbells only".into(),
            ..prefs
        };
        assert_eq!(check_plan(&p, &dumbbells_only).len(), 1);
    }

    #[test]
    fn test_risk_query_prefix() {
        assert_eq!(
            RiskModificationTool::query_for("knee pain, lower back pain"),
            "risk mitigation substitute exercises knee pain, lower back pain"
        );
    }
}
