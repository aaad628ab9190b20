//! Agent System
//!
//! Two LLM stages built on one generic tool-agent loop:
//!
//! - **Analyzer**: evaluates the InBody measurements with deterministic body
//!   metric tools and one knowledge lookup, and produces an `AnalysisResult`
//! - **Planner**: turns the analysis into a weekly `TrainingPlan` using
//!   training and risk-substitution knowledge
//!
//! ## Pipeline Overview
//!
//! ```text
//! TrainingRequest
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Analyzer   │  → calculate_smm_ratio, evaluate_body_type, retriever_tool
//! │   Stage     │
//! └─────────────┘
//!      │  AnalysisResult
//!      ▼
//! ┌─────────────┐
//! │   Adapter   │  → replaces the conversation with a planner instruction
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Planner   │  → training_retriever_tool, risk_modification_tool
//! │   Stage     │
//! └─────────────┘
//!      │  TrainingPlan
//!      ▼
//! TrainingResponse
//! ```

pub mod analyzer;
pub mod body_metrics;
pub mod extraction;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod state;
pub mod structured;

// Re-export main components
pub use extraction::InBodyExtractor;
pub use graph::{Finalizer, Tool, ToolAgentGraph, ToolSet};
pub use orchestrator::{adapt_for_planner, create_initial_state, Pipeline, PipelineOptions};
pub use state::AgentState;
