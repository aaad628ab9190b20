//! Orchestrator: Analyzer → Adapter → Planner.
//!
//! The orchestrator alone owns the state between stages. The adapter step
//! replaces the analyzer's conversation with a single planner instruction,
//! so the planner never sees analyzer tool traffic.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

use super::analyzer::{analysis_request_message, build_analyzer, AnalysisFinalizer};
use super::graph::ToolAgentGraph;
use super::planner::{build_planner, planning_request_message, PlanFinalizer};
use super::state::AgentState;
use crate::config::Config;
use crate::llm::LLM;
use crate::models::{TrainingRequest, TrainingResponse};
use crate::retrieval::RetrievalService;
use crate::types::{AppError, AppResult, LLMMessage};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub analyzer_temperature: f32,
    pub planner_temperature: f32,
    pub max_turns: usize,
    pub enforce_plan_constraints: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analyzer_temperature: 0.5,
            planner_temperature: 0.3,
            max_turns: 25,
            enforce_plan_constraints: true,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analyzer_temperature: config.llm.analyzer_temperature,
            planner_temperature: config.llm.planner_temperature,
            max_turns: config.agent.max_turns,
            enforce_plan_constraints: config.agent.enforce_plan_constraints,
        }
    }
}

/// Seed state for a run: the input plus the analyzer's first user turn
pub fn create_initial_state(input: TrainingRequest) -> AgentState {
    let message = analysis_request_message(&input);
    AgentState::new(input, vec![LLMMessage::user(message)])
}

/// Replace the conversation with the planner instruction
pub fn adapt_for_planner(state: &mut AgentState) -> AppResult<()> {
    let report = state
        .analysis_report()
        .cloned()
        .ok_or_else(|| AppError::EmptyResult("analysis report was not generated".to_string()))?;
    let instruction = planning_request_message(state.input(), &report);
    state.replace_messages(vec![LLMMessage::user(instruction)]);
    Ok(())
}

pub struct Pipeline {
    analyzer: ToolAgentGraph<AnalysisFinalizer>,
    planner: ToolAgentGraph<PlanFinalizer>,
}

impl Pipeline {
    pub fn new(llm: LLM, retrieval: Arc<RetrievalService>, options: PipelineOptions) -> AppResult<Self> {
        let analyzer = build_analyzer(
            llm.clone().with_temperature(options.analyzer_temperature),
            retrieval.clone(),
            options.max_turns,
        )?;
        let planner = build_planner(
            llm.with_temperature(options.planner_temperature),
            retrieval,
            options.max_turns,
            options.enforce_plan_constraints,
        )?;
        Ok(Self { analyzer, planner })
    }

    /// Validate the input and run both stages
    pub async fn run(&self, input: TrainingRequest) -> AppResult<TrainingResponse> {
        input.validate()?;
        let state = self.run_with_state(create_initial_state(input)).await?;
        let (analysis_report, training_plan) = state.into_outputs()?;
        Ok(TrainingResponse {
            analysis_report,
            training_plan,
        })
    }

    /// Run both stages over an existing state and hand it back
    pub async fn run_with_state(&self, state: AgentState) -> AppResult<AgentState> {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, "Pipeline started");

        let result = self.run_stages(state).await;
        match &result {
            Ok(_) => info!(run_id = %run_id, "Pipeline complete"),
            Err(e) => error!(run_id = %run_id, error = %e, "Pipeline failed"),
        }
        result
    }

    async fn run_stages(&self, state: AgentState) -> AppResult<AgentState> {
        let mut state = self.analyzer.run(state).await?;
        if state.analysis_report().is_none() {
            return Err(AppError::EmptyResult("analysis report was not generated".to_string()));
        }

        adapt_for_planner(&mut state)?;
        info!(stage = "adapter", "Conversation handed to planner");

        let state = self.planner.run(state).await?;
        if state.training_plan().is_none() {
            return Err(AppError::EmptyResult("training plan was not generated".to_string()));
        }
        Ok(state)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::agents::planner::{check_plan, DIRECTIVE as PLANNER_DIRECTIVE};
    use crate::llm::testing::{text, ScriptedAdapter};
    use crate::models::fixtures::sample_request;
    use crate::models::Experience;
    use crate::types::roles;

    fn beginner_home_30() -> TrainingRequest {
        let mut input = sample_request();
        input.user_profile.training_experience = Experience::Beginner;
        input.preferences.training_time_minutes = 30;
        input
    }

    async fn pipeline(adapter: Arc<ScriptedAdapter>, dir: &std::path::Path) -> Pipeline {
        let llm = LLM::with_adapter(adapter, "scripted", "scripted-model");
        Pipeline::new(llm, retrieval(dir).await, PipelineOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_beginner_home_plan() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(successful_script()));
        let pipeline = pipeline(adapter.clone(), dir.path()).await;
        let input = beginner_home_30();

        let response = pipeline.run(input.clone()).await.unwrap();
        assert_eq!(adapter.remaining(), 0);
        assert!(check_plan(&response.training_plan, &input.preferences).is_empty());
        for day in &response.training_plan.weekly_schedule {
            if day.exercises.is_empty() {
                continue;
            }
            assert!((5..=7).contains(&day.exercises.len()));
            for exercise in &day.exercises {
                let text = format!("{} {}", exercise.exercise_name, exercise.notes).to_lowercase();
                assert!(!text.contains("machine") && !text.contains("barbell"));
            }
        }
        assert_eq!(response.analysis_report.risk_factors, vec!["lower back pain".to_string()]);
    }

    #[tokio::test]
    async fn test_planner_history_has_no_analyzer_tool_turns() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(successful_script()));
        let pipeline = pipeline(adapter.clone(), dir.path()).await;

        let state = pipeline
            .run_with_state(create_initial_state(beginner_home_30()))
            .await
            .unwrap();

        let requests = adapter.requests();
        assert_eq!(requests.len(), 6);

        // Analyzer's second turn sees three tool results
        assert_eq!(requests[1].messages.iter().filter(|m| m.is_tool_result()).count(), 3);
        // The retriever tool returned knowledge text
        assert!(requests[1].messages[4].text().starts_with("[Result 1]"));

        let planner_first = &requests[3];
        assert_eq!(planner_first.system_instruction.as_deref(), Some(PLANNER_DIRECTIVE));
        assert_eq!(planner_first.messages.len(), 1);
        assert_eq!(planner_first.messages[0].role, roles::USER);
        assert!(planner_first.messages[0].text().contains("## Analysis report"));
        assert!(planner_first.messages[0].text().contains("lower back pain"));
        assert!(planner_first.messages.iter().all(|m| m.tool_calls.is_empty() && !m.is_tool_result()));

        // Planner temperature differs from the analyzer's
        assert_eq!(requests[0].temperature, Some(0.5));
        assert_eq!(planner_first.temperature, Some(0.3));

        // Final state only carries planner traffic
        assert!(state.messages().iter().all(|m| m.name.as_deref() != Some("retriever_tool")));
        assert!(state.training_plan().is_some());
    }

    #[tokio::test]
    async fn test_empty_analysis_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![text("No tools needed."), text("")]));
        let pipeline = pipeline(adapter.clone(), dir.path()).await;

        let err = pipeline.run(beginner_home_30()).await.unwrap_err();
        assert!(matches!(err, AppError::EmptyResult(_)));
        assert!(!err.is_client_error());
        // The planner never ran
        assert_eq!(adapter.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        let pipeline = pipeline(adapter.clone(), dir.path()).await;

        let mut input = sample_request();
        input.inbody_metrics.weight_kg = 250.0;
        let err = pipeline.run(input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(adapter.requests().is_empty());
    }

    #[tokio::test]
    async fn test_gym_plan_at_home_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = successful_script();
        let bad_plan = plan_json().replace("Calf raise", "Calf raise machine");
        script[5] = text(&bad_plan);
        let adapter = Arc::new(ScriptedAdapter::new(script));
        let pipeline = pipeline(adapter, dir.path()).await;

        let err = pipeline.run(beginner_home_30()).await.unwrap_err();
        assert!(matches!(err, AppError::StructuredOutput { ref stage, .. } if stage == "planner"));
    }

    #[test]
    fn test_adapter_requires_report() {
        let mut state = create_initial_state(sample_request());
        assert!(matches!(adapt_for_planner(&mut state), Err(AppError::EmptyResult(_))));
        assert_eq!(state.messages().len(), 1);
    }
}
