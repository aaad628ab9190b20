//! Analyzer Stage
//!
//! Evaluates the InBody measurements objectively: muscle ratio and body type
//! from deterministic tools, criteria and risk context from one merged
//! knowledge query, then a schema-constrained `AnalysisResult`. It never
//! recommends training; that is the planner's job.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::body_metrics::{classify_body_type, evaluate_muscle_ratio};
use super::graph::{parse_arguments, Finalizer, Tool, ToolAgentGraph, ToolSet};
use super::state::AgentState;
use super::structured::request_structured;
use crate::llm::LLM;
use crate::models::{AnalysisResult, TrainingRequest};
use crate::retrieval::{RetrievalService, DEFAULT_DIVERSITY};
use crate::types::{AppResult, ToolSpec};

pub const STAGE: &str = "analyzer";

const RETRIEVER_K: usize = 3;
const RETRIEVER_FETCH_K: usize = 10;

pub const DIRECTIVE: &str = r#"You are an expert in exercise physiology and sports medicine.

## Task
Analyse the user's InBody data in detail and evaluate their current body composition objectively.
Do not recommend training. Output analysis only.

## Procedure
1. Call calculate_smm_ratio to compute skeletal muscle mass relative to body weight.
2. Call evaluate_body_type with weight, height and body fat percentage (BMI is computed for you).
3. Call retriever_tool exactly ONCE, merging every topic below into a single query:
   - detailed guidance for the body type
   - body fat rating criteria (low / standard / mildly obese / obese)
   - risk management for the user's injury history
   - criteria for upper/lower and left/right balance
4. Evaluate left/right and upper/lower balance against the knowledge base criteria.
5. Identify risk factors from the injury history and the measurements.

## Output
- Body type (use the evaluate_body_type result), body fat rating, skeletal muscle rating
- Arm, leg and upper/lower balance with the percentage difference
- Risk factors and concerns"#;

/// Knowledge lookup, limited to one call per analysis
pub struct RetrieverTool {
    retrieval: Arc<RetrievalService>,
}

impl RetrieverTool {
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self { retrieval }
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[async_trait]
impl Tool for RetrieverTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "retriever_tool".to_string(),
            description: "Search the body-composition knowledge base. Call this only ONCE per turn; \
                merge every topic into one space-separated query. Covers the ten body types \
                (underweight, slightly-underweight, lean, muscular-lean, proper, muscular, athletic, \
                hidden-obesity, slightly-overweight, overweight) with metabolism, nutrition and cardio \
                guidance; body fat and muscle rating criteria; joint, metabolic and hormonal risks; \
                progression models; the exercise library; imbalance, recovery and supplements. \
                Example: \"hidden obesity advice skeletal muscle rating criteria recovery supplements\"."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "All search topics in one query"}
                },
                "required": ["query"]
            }),
        }
    }

    fn call_budget(&self) -> Option<usize> {
        Some(1)
    }

    async fn call(&self, arguments: Value) -> AppResult<String> {
        let args: QueryArgs = match parse_arguments("retriever_tool", arguments) {
            Ok(args) => args,
            Err(message) => return Ok(message),
        };
        self.retrieval
            .search(&args.query, RETRIEVER_K, RETRIEVER_FETCH_K, DEFAULT_DIVERSITY)
            .await
    }
}

pub struct MuscleRatioTool;

#[derive(Deserialize)]
struct MuscleRatioArgs {
    skeletal_muscle_mass_kg: f64,
    weight_kg: f64,
    gender: String,
}

#[async_trait]
impl Tool for MuscleRatioTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "calculate_smm_ratio".to_string(),
            description: "Compute skeletal muscle mass as a percentage of body weight and rate it \
                (excellent / standard / insufficient) for the given sex."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "skeletal_muscle_mass_kg": {"type": "number"},
                    "weight_kg": {"type": "number"},
                    "gender": {"type": "string", "enum": ["male", "female"]}
                },
                "required": ["skeletal_muscle_mass_kg", "weight_kg", "gender"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> AppResult<String> {
        Ok(match parse_arguments::<MuscleRatioArgs>("calculate_smm_ratio", arguments) {
            Ok(a) => evaluate_muscle_ratio(a.skeletal_muscle_mass_kg, a.weight_kg, &a.gender),
            Err(message) => message,
        })
    }
}

pub struct BodyTypeTool;

#[derive(Deserialize)]
struct BodyTypeArgs {
    weight_kg: f64,
    height_cm: f64,
    body_fat_percent: f64,
    gender: String,
}

#[async_trait]
impl Tool for BodyTypeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "evaluate_body_type".to_string(),
            description: "Classify the body type from weight, height and body fat percentage using \
                the InBody body-type matrix."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "weight_kg": {"type": "number"},
                    "height_cm": {"type": "number"},
                    "body_fat_percent": {"type": "number"},
                    "gender": {"type": "string", "enum": ["male", "female"]}
                },
                "required": ["weight_kg", "height_cm", "body_fat_percent", "gender"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> AppResult<String> {
        Ok(match parse_arguments::<BodyTypeArgs>("evaluate_body_type", arguments) {
            Ok(a) => classify_body_type(a.weight_kg, a.height_cm, a.body_fat_percent, &a.gender),
            Err(message) => message,
        })
    }
}

fn injuries_text(injuries: &[String]) -> String {
    if injuries.is_empty() {
        "none".to_string()
    } else {
        injuries.join(", ")
    }
}

fn or_unspecified(value: &str) -> &str {
    if value.trim().is_empty() {
        "unspecified"
    } else {
        value
    }
}

/// First user turn of a run
pub fn analysis_request_message(input: &TrainingRequest) -> String {
    let profile = &input.user_profile;
    let metrics = &input.inbody_metrics;
    let segments = &metrics.segmental_lean;

    format!(
        "Analyse the following InBody data.

## User profile
- Age: {age}
- Sex: {sex}
- Height: {height} cm
- Training experience: {experience}
- Injuries / medical history: {injuries}

## InBody measurements
- Weight: {weight} kg
- Muscle mass: {muscle} kg
- Skeletal muscle mass: {smm} kg
- Body fat: {bf}%
- Segmental skeletal muscle:
  - Right arm: {ra} kg
  - Left arm: {la} kg
  - Trunk: {trunk} kg
  - Right leg: {rl} kg
  - Left leg: {ll} kg

## Goal
- Goal type: {goal}
- Training days per week: {days}

Use retriever_tool to look up expert knowledge and base the analysis on evidence.",
        age = profile.age,
        sex = profile.gender,
        height = profile.height_cm,
        experience = profile.training_experience,
        injuries = injuries_text(&profile.injuries),
        weight = metrics.weight_kg,
        muscle = metrics.muscle_mass_kg,
        smm = metrics.skeletal_muscle_mass_kg,
        bf = metrics.body_fat_percent,
        ra = segments.right_arm,
        la = segments.left_arm,
        trunk = segments.trunk,
        rl = segments.right_leg,
        ll = segments.left_leg,
        goal = input.goal.goal_type,
        days = or_unspecified(&input.goal.days_per_week),
    )
}

pub(crate) fn knowledge_context(state: &AgentState) -> String {
    let results = state.tool_results();
    if results.is_empty() {
        "No expert knowledge retrieved.".to_string()
    } else {
        results.join("\n\n")
    }
}

pub fn analysis_schema() -> Value {
    let text = |description: &str| json!({"type": "string", "description": description});
    let list = |description: &str| json!({"type": "array", "items": {"type": "string"}, "description": description});
    json!({
        "type": "object",
        "properties": {
            "body_type": text("Body type from evaluate_body_type"),
            "body_fat_evaluation": text("Body fat rating (low / standard / mildly obese / obese) with the numbers behind it"),
            "skeletal_muscle_evaluation": text("Skeletal muscle rating (excellent / standard / slightly low / low) with the numbers behind it"),
            "arm_balance": text("Left/right arm balance (normal / mild imbalance / needs attention) with the % difference"),
            "leg_balance": text("Left/right leg balance (normal / mild imbalance / needs attention) with the % difference"),
            "upper_lower_balance": text("Upper/lower body balance"),
            "risk_factors": list("Risk factors derived from history and measurements"),
            "concerns": list("Points needing attention")
        },
        "required": [
            "body_type", "body_fat_evaluation", "skeletal_muscle_evaluation", "arm_balance",
            "leg_balance", "upper_lower_balance", "risk_factors", "concerns"
        ],
        "additionalProperties": false
    })
}

/// Synthesises the `AnalysisResult` from tool output and the input data
pub struct AnalysisFinalizer {
    llm: LLM,
}

impl AnalysisFinalizer {
    pub fn new(llm: LLM) -> Self {
        Self { llm }
    }

    fn prompt(state: &AgentState) -> String {
        let input = state.input();
        let profile = &input.user_profile;
        let metrics = &input.inbody_metrics;
        let s = &metrics.segmental_lean;

        format!(
            "Analyse the current body composition in detail from the InBody data and expert knowledge below.

## Expert knowledge (search results and tool output)
{context}

## User data
- Age: {age}, sex: {sex}
- Weight: {weight} kg, skeletal muscle mass: {smm} kg
- Body fat: {bf}%
- Segmental skeletal muscle: right arm {ra} kg, left arm {la} kg, trunk {trunk} kg, right leg {rl} kg, left leg {ll} kg
- Injuries / medical history: {injuries}

Do not include training recommendations. Output only the objective analysis as structured data.",
            context = knowledge_context(state),
            age = profile.age,
            sex = profile.gender,
            weight = metrics.weight_kg,
            smm = metrics.skeletal_muscle_mass_kg,
            bf = metrics.body_fat_percent,
            ra = s.right_arm,
            la = s.left_arm,
            trunk = s.trunk,
            rl = s.right_leg,
            ll = s.left_leg,
            injuries = injuries_text(&profile.injuries),
        )
    }
}

#[async_trait]
impl Finalizer for AnalysisFinalizer {
    type Output = AnalysisResult;

    async fn finalize(&self, state: &AgentState) -> AppResult<AnalysisResult> {
        request_structured(&self.llm, STAGE, Self::prompt(state), "AnalysisResult", analysis_schema()).await
    }

    fn commit(&self, state: &mut AgentState, output: AnalysisResult) -> AppResult<()> {
        state.set_analysis_report(output)
    }
}

pub fn build_analyzer(
    llm: LLM,
    retrieval: Arc<RetrievalService>,
    max_turns: usize,
) -> AppResult<ToolAgentGraph<AnalysisFinalizer>> {
    let tools = ToolSet::new(vec![
        Arc::new(RetrieverTool::new(retrieval)) as Arc<dyn Tool>,
        Arc::new(MuscleRatioTool),
        Arc::new(BodyTypeTool),
    ])?;
    Ok(ToolAgentGraph::new(
        STAGE,
        DIRECTIVE,
        tools,
        llm.clone(),
        AnalysisFinalizer::new(llm),
        max_turns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_request;

    #[tokio::test]
    async fn test_body_tools_render_text() {
        let ratio = MuscleRatioTool
            .call(json!({"skeletal_muscle_mass_kg": 28.0, "weight_kg": 70.0, "gender": "male"}))
            .await
            .unwrap();
        assert_eq!(ratio, "Skeletal muscle ratio: 40.0% (male: standard)");

        let body = BodyTypeTool
            .call(json!({"weight_kg": 70.0, "height_cm": 172.0, "body_fat_percent": 22.0, "gender": "male"}))
            .await
            .unwrap();
        assert!(body.starts_with("Body type: slightly-overweight"));
    }

    #[tokio::test]
    async fn test_body_tool_invalid_input_is_text() {
        let out = BodyTypeTool
            .call(json!({"weight_kg": 0.0, "height_cm": 172.0, "body_fat_percent": 22.0, "gender": "male"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error:"));

        let out = MuscleRatioTool.call(json!({"weight_kg": "heavy"})).await.unwrap();
        assert!(out.starts_with("Error: invalid arguments for calculate_smm_ratio"));
    }

    #[test]
    fn test_request_message_lists_measurements() {
        let message = analysis_request_message(&sample_request());
        assert!(message.contains("- Sex: male"));
        assert!(message.contains("- Skeletal muscle mass: 28 kg"));
        assert!(message.contains("lower back pain"));
        assert!(message.contains("retriever_tool"));
    }

    #[test]
    fn test_schema_requires_every_field() {
        let schema = analysis_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 8);
    }
}
