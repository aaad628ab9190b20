//! Pipeline state threaded through every stage.
//!
//! One `AgentState` is owned by one pipeline run. The conversation is
//! append-only inside a stage and is replaced wholesale only by the adapter
//! between stages. The two stage outputs are write-once slots.

use serde::{Deserialize, Serialize};

use crate::models::{AnalysisResult, TrainingPlan, TrainingRequest};
use crate::types::{AppError, AppResult, LLMMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    messages: Vec<LLMMessage>,
    input_data: TrainingRequest,
    analysis_report: Option<AnalysisResult>,
    training_plan: Option<TrainingPlan>,
}

impl AgentState {
    pub fn new(input_data: TrainingRequest, messages: Vec<LLMMessage>) -> Self {
        Self {
            messages,
            input_data,
            analysis_report: None,
            training_plan: None,
        }
    }

    pub fn input(&self) -> &TrainingRequest {
        &self.input_data
    }

    pub fn messages(&self) -> &[LLMMessage] {
        &self.messages
    }

    pub fn append(&mut self, message: LLMMessage) {
        self.messages.push(message);
    }

    /// Swap in a fresh conversation at a stage boundary
    pub(crate) fn replace_messages(&mut self, messages: Vec<LLMMessage>) {
        self.messages = messages;
    }

    /// Text of every tool result in the current conversation, in order
    pub fn tool_results(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| m.is_tool_result())
            .map(|m| m.text())
            .collect()
    }

    pub fn analysis_report(&self) -> Option<&AnalysisResult> {
        self.analysis_report.as_ref()
    }

    pub fn training_plan(&self) -> Option<&TrainingPlan> {
        self.training_plan.as_ref()
    }

    pub fn set_analysis_report(&mut self, report: AnalysisResult) -> AppResult<()> {
        if self.analysis_report.is_some() {
            return Err(AppError::Internal("analysis report is already set".to_string()));
        }
        self.analysis_report = Some(report);
        Ok(())
    }

    pub fn set_training_plan(&mut self, plan: TrainingPlan) -> AppResult<()> {
        if self.training_plan.is_some() {
            return Err(AppError::Internal("training plan is already set".to_string()));
        }
        self.training_plan = Some(plan);
        Ok(())
    }

    /// Take both outputs, failing with `EmptyResult` if either is missing
    pub fn into_outputs(self) -> AppResult<(AnalysisResult, TrainingPlan)> {
        let report = self
            .analysis_report
            .ok_or_else(|| AppError::EmptyResult("analysis report was not generated".to_string()))?;
        let plan = self
            .training_plan
            .ok_or_else(|| AppError::EmptyResult("training plan was not generated".to_string()))?;
        Ok((report, plan))
    }
}
