//! Generic tool-calling agent loop.
//!
//! A stage is a `ToolAgentGraph`: a directive, a closed set of tools, a chat
//! model and a finalizer. Running it moves through three phases:
//!
//! ```text
//!            tool calls               always
//! Deciding ─────────────► Invoking ─────────► Deciding
//!     │
//!     │ no tool calls
//!     ▼
//! Finalizing (terminal: structured output or failure)
//! ```
//!
//! The directive is sent as the system instruction of every model turn and
//! never stored in the conversation. All tool calls of one turn run
//! concurrently; their results are appended in the order the model issued
//! the calls.

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::AgentState;
use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, ToolCall, ToolSpec};

/// A typed tool the model can call by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Maximum number of calls honoured per stage run
    fn call_budget(&self) -> Option<usize> {
        None
    }

    /// Invalid input is reported as `Ok` text for the model to read.
    /// `Err` aborts the stage.
    async fn call(&self, arguments: Value) -> AppResult<String>;
}

/// Decode tool arguments, rendering failures as tool-result text
pub fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments)
        .map_err(|e| format!("Error: invalid arguments for {}: {}", tool, e))
}

/// Closed mapping from tool name to tool, fixed at construction
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> AppResult<Self> {
        let mut by_name = HashMap::new();
        for (i, tool) in tools.iter().enumerate() {
            let name = tool.spec().name;
            if by_name.insert(name.clone(), i).is_some() {
                return Err(AppError::Internal(format!("duplicate tool name: {}", name)));
            }
        }
        Ok(Self { tools, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Produces a stage's structured output once the model stops calling tools
#[async_trait]
pub trait Finalizer: Send + Sync {
    type Output: Send;

    async fn finalize(&self, state: &AgentState) -> AppResult<Self::Output>;

    /// Store the validated output in the state slot this stage owns
    fn commit(&self, state: &mut AgentState, output: Self::Output) -> AppResult<()>;
}

#[derive(Debug)]
enum Phase {
    Deciding,
    Invoking(Vec<ToolCall>),
    Finalizing,
}

pub struct ToolAgentGraph<F> {
    stage: String,
    directive: String,
    tools: ToolSet,
    llm: LLM,
    finalizer: F,
    max_turns: usize,
}

impl<F: Finalizer> ToolAgentGraph<F> {
    pub fn new(
        stage: impl Into<String>,
        directive: impl Into<String>,
        tools: ToolSet,
        llm: LLM,
        finalizer: F,
        max_turns: usize,
    ) -> Self {
        Self {
            stage: stage.into(),
            directive: directive.into(),
            tools,
            llm,
            finalizer,
            max_turns: max_turns.max(1),
        }
    }

    /// Drive the state machine to completion
    pub async fn run(&self, mut state: AgentState) -> AppResult<AgentState> {
        let mut phase = Phase::Deciding;
        let mut turns = 0usize;
        let mut calls_made: HashMap<String, usize> = HashMap::new();

        info!(stage = %self.stage, messages = state.messages().len(), "Stage started");

        loop {
            phase = match phase {
                Phase::Deciding => {
                    if turns >= self.max_turns {
                        return Err(AppError::TurnLimit {
                            stage: self.stage.clone(),
                            limit: self.max_turns,
                        });
                    }
                    turns += 1;

                    let mut request = self.llm.request(state.messages().to_vec());
                    request.system_instruction = Some(self.directive.clone());
                    request.tools = self.tools.specs();

                    let response = self.llm.create_chat_completion(&request).await?;
                    let calls = response.tool_calls.clone();
                    debug!(
                        stage = %self.stage,
                        turn = turns,
                        tool_calls = calls.len(),
                        tokens = response.usage.total_tokens,
                        "Model turn complete"
                    );
                    state.append(response.into_message());

                    if calls.is_empty() {
                        Phase::Finalizing
                    } else {
                        Phase::Invoking(calls)
                    }
                }
                Phase::Invoking(calls) => {
                    self.invoke(&mut state, calls, &mut calls_made).await?;
                    Phase::Deciding
                }
                Phase::Finalizing => {
                    info!(stage = %self.stage, turns, "Finalizing");
                    let output = self.finalizer.finalize(&state).await?;
                    self.finalizer.commit(&mut state, output)?;
                    info!(stage = %self.stage, "Stage complete");
                    return Ok(state);
                }
            };
        }
    }

    async fn invoke(
        &self,
        state: &mut AgentState,
        calls: Vec<ToolCall>,
        calls_made: &mut HashMap<String, usize>,
    ) -> AppResult<()> {
        // Resolve every name before running anything
        let mut resolved = Vec::with_capacity(calls.len());
        for call in &calls {
            let tool = self.tools.get(&call.name).ok_or_else(|| AppError::ProtocolViolation {
                stage: self.stage.clone(),
                tool: call.name.clone(),
            })?;

            let used = calls_made.entry(call.name.clone()).or_insert(0);
            *used += 1;
            let within_budget = tool.call_budget().map_or(true, |budget| *used <= budget);
            if !within_budget {
                warn!(stage = %self.stage, tool = %call.name, "Tool call budget exhausted");
            }
            resolved.push((tool.clone(), within_budget));
        }

        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        info!(stage = %self.stage, tools = ?names, "Invoking tools");

        let results = join_all(calls.iter().zip(resolved).map(|(call, (tool, within_budget))| async move {
            if within_budget {
                tool.call(call.arguments.clone()).await
            } else {
                Ok(format!(
                    "{} has already been called in this stage. Use the results you already have.",
                    call.name
                ))
            }
        }))
        .await;

        for (call, result) in calls.iter().zip(results) {
            let text = result?;
            debug!(stage = %self.stage, tool = %call.name, call_id = %call.id, chars = text.len(), "Tool result");
            state.append(LLMMessage::tool_result(&call.id, &call.name, text));
        }
        Ok(())
    }
}
