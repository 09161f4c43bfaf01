//! ReAct Controller (C8) — drives the Think→Act→Observe→Reflect loop,
//! integrates C3–C7, emits a step stream, and produces the final answer
//! (spec.md §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::agent::events::{emit, StepEvent, StepSender};
use crate::agent::prompts::{act_prompt, extract_function_name, final_prompt, indicates_action_intent, parse_reflection, reflect_prompt, think_prompt};
use crate::agent::state::{ActionRecord, AgentRunState, ObservationRecord, ReflectionRecord, RunStatus};
use crate::config::{AgentConfig, StreamingConfig};
use crate::context::ContextBuilder;
use crate::executor::RetryExecutor;
use crate::llm::{InferenceOptions, InferenceProvider, Message};
use crate::quality::{self, QualityInputs};
use crate::registry::Registry;
use crate::selector::HybridSelector;
use crate::synth::{self, SynthesisContext};
use crate::types::{ConversationId, UserId};

const FALLBACK_THINK: &str = "I was unable to reason about this step in time; proceeding conservatively.";
const FALLBACK_REFLECT: &str = "Reflection timed out; assuming the run should not continue.";
const FALLBACK_FINAL: &str = "I'm sorry, I could not finish composing a complete answer in time.";
const APOLOGY: &str = "I'm sorry, something went wrong while handling your request.";

pub struct ReactController {
    context_builder: Arc<ContextBuilder>,
    selector: Arc<HybridSelector>,
    registry: Arc<Registry>,
    executor: Arc<RetryExecutor>,
    llm: Arc<dyn InferenceProvider>,
    agent_config: AgentConfig,
    streaming_config: StreamingConfig,
}

impl ReactController {
    pub fn new(
        context_builder: Arc<ContextBuilder>,
        selector: Arc<HybridSelector>,
        registry: Arc<Registry>,
        executor: Arc<RetryExecutor>,
        llm: Arc<dyn InferenceProvider>,
        agent_config: AgentConfig,
        streaming_config: StreamingConfig,
    ) -> Self {
        Self { context_builder, selector, registry, executor, llm, agent_config, streaming_config }
    }

    pub async fn run(
        &self,
        user_id: UserId,
        query: String,
        conversation_id: Option<ConversationId>,
        stream_tx: Option<StepSender>,
    ) -> AgentRunState {
        let started = Instant::now();
        let send_timeout = Duration::from_millis(self.streaming_config.step_send_timeout_ms);
        let mut state = AgentRunState::new(user_id, conversation_id, query.clone(), self.agent_config.max_steps);

        emit(&stream_tx, send_timeout, StepEvent::Start { query: query.clone() }).await;

        let context = match self.context_builder.build(user_id, conversation_id, Some(query.clone())).await {
            Ok(c) => c,
            Err(e) => return self.fail(state, &stream_tx, send_timeout, started, e.to_string()).await,
        };

        let selection = match self.selector.select(&query, 5).await {
            Ok(s) => s,
            Err(e) => return self.fail(state, &stream_tx, send_timeout, started, e.to_string()).await,
        };
        state.retrieved_functions = selection.functions.clone();
        state.selection_method = selection.method;
        state.selection_confidence = selection.confidence;

        if selection.functions.is_empty() {
            info!("no candidate functions; synthesizing a direct answer");
            let answer = self.call_llm_with_timeout(
                vec![Message::system("Answer the user's query directly."), Message::user(query.clone())],
                self.agent_config.final_timeout,
                FALLBACK_FINAL,
            )
            .await;
            state.final_answer = Some(answer.clone());
            state.status = RunStatus::Completed;
            state.quality_score = 0.0;
            state.total_execution_time_ms = started.elapsed().as_millis() as u64;
            emit(&stream_tx, send_timeout, StepEvent::FinalAnswer { content: answer }).await;
            emit(&stream_tx, send_timeout, StepEvent::Complete { status: state.status, quality_score: 0.0 }).await;
            self.persist_interaction(&state).await;
            return state;
        }

        let synthesis_context = SynthesisContext { user_id: Some(user_id.to_string()) };
        let mut previous_results: Vec<Value> = Vec::new();

        while state.current_step < state.max_steps {
            state.current_step += 1;
            state.status = RunStatus::Thinking;

            let thought = self
                .call_llm_with_timeout(
                    vec![
                        Message::system("You reason step by step about how to answer the user."),
                        Message::user(think_prompt(&query, &state.retrieved_functions, &state.thoughts)),
                    ],
                    self.agent_config.think_timeout,
                    FALLBACK_THINK,
                )
                .await;
            state.thoughts.push(thought.clone());
            emit(&stream_tx, send_timeout, StepEvent::Thought { step: state.current_step, content: thought.clone() }).await;

            if indicates_action_intent(&thought) {
                state.status = RunStatus::Acting;
                if let Some((action, observation)) = self
                    .act_and_observe(&query, &thought, &mut state, &synthesis_context, &previous_results)
                    .await
                {
                    if let Some(data) = &observation.data {
                        previous_results.push(data.clone());
                    }
                    emit(
                        &stream_tx,
                        send_timeout,
                        StepEvent::Action {
                            step: action.step,
                            function_name: action.function_name.clone(),
                            parameters: action.parameters.clone(),
                        },
                    )
                    .await;
                    state.actions.push(action);
                    state.status = RunStatus::Observing;
                    emit(
                        &stream_tx,
                        send_timeout,
                        StepEvent::Observation {
                            step: observation.step,
                            success: observation.success,
                            data: observation.data.clone(),
                            error: observation.error.clone(),
                        },
                    )
                    .await;
                    state.observations.push(observation);
                    state.api_calls_made += 1;
                }
            }

            state.status = RunStatus::Reflecting;
            let reflect_text = self
                .call_llm_with_timeout(
                    vec![
                        Message::system("You judge whether the run has enough information to answer."),
                        Message::user(reflect_prompt(&query, &state.observations)),
                    ],
                    self.agent_config.reflect_timeout,
                    FALLBACK_REFLECT,
                )
                .await;
            let (parsed_quality, parsed_continue, reasoning) = parse_reflection(&reflect_text);
            let objective = quality::validate(
                &QualityInputs {
                    actions_len: state.actions.len(),
                    successful_observations: state.successful_observations(),
                    observations_len: state.observations.len(),
                    final_answer: None,
                },
                None,
            );
            let should_continue = objective.overall < self.agent_config.quality_threshold
                && state.current_step < state.max_steps;
            state.reflections.push(ReflectionRecord {
                step: state.current_step,
                parsed_quality,
                objective_quality: objective.overall,
                should_continue,
                reasoning: if reasoning.is_empty() { reflect_text.clone() } else { reasoning },
            });
            // parsed_continue is the model's own vote; the objective score is authoritative
            // (spec.md §4.8 step 3e — "Overwrite the parsed quality with C7's objective score").
            let _ = parsed_continue;

            if !should_continue {
                break;
            }
        }

        let final_answer = self
            .call_llm_with_timeout(
                vec![
                    Message::system("Compose the final answer for the user."),
                    Message::user(final_prompt(&query, &state.observations)),
                ],
                self.agent_config.final_timeout,
                FALLBACK_FINAL,
            )
            .await;
        let final_quality = quality::validate(
            &QualityInputs {
                actions_len: state.actions.len(),
                successful_observations: state.successful_observations(),
                observations_len: state.observations.len(),
                final_answer: Some(&final_answer),
            },
            None,
        );
        state.final_answer = Some(final_answer.clone());
        state.quality_score = final_quality.overall;
        state.status = if quality::is_completable(&final_quality, self.agent_config.quality_threshold) {
            RunStatus::Completed
        } else {
            RunStatus::Incomplete
        };
        state.quality_details = Some(final_quality);
        state.total_execution_time_ms = started.elapsed().as_millis() as u64;

        emit(&stream_tx, send_timeout, StepEvent::FinalAnswer { content: final_answer }).await;
        emit(&stream_tx, send_timeout, StepEvent::Complete { status: state.status, quality_score: state.quality_score }).await;
        self.persist_interaction(&state).await;
        state
    }

    /// ACT: extract a function name, resolve its schema, synthesize
    /// parameters, and execute. Any failure along the way is swallowed —
    /// a single iteration's inability to act is not a run failure
    /// (spec.md §7) — and the loop falls through to REFLECT.
    async fn act_and_observe(
        &self,
        query: &str,
        thought: &str,
        state: &mut AgentRunState,
        synthesis_context: &SynthesisContext,
        previous_results: &[Value],
    ) -> Option<(ActionRecord, ObservationRecord)> {
        let act_text = self
            .call_llm_with_timeout(
                vec![
                    Message::system("You name exactly one function to call."),
                    Message::user(act_prompt(query, thought, &state.retrieved_functions)),
                ],
                self.agent_config.act_timeout,
                "",
            )
            .await;
        let function_name = extract_function_name(&act_text)?;

        let candidate = state.retrieved_functions.iter().find(|c| c.name == function_name)?;
        let function_id = candidate.function_id.clone();
        let schema = self.registry.get(&function_id).await.ok().flatten()?;

        let outcome = synth::synthesize(self.llm.as_ref(), &schema, query, synthesis_context, previous_results)
            .await
            .ok()?;

        let action = ActionRecord {
            step: state.current_step,
            function_name: function_name.clone(),
            parameters: serde_json::to_value(&outcome.parameters).unwrap_or(Value::Null),
        };

        let params: HashMap<String, Value> = outcome.parameters;
        let result = self.executor.execute(&function_id, params, true).await;
        let observation = ObservationRecord {
            step: state.current_step,
            success: result.success,
            data: result.data,
            error: result.error,
        };
        Some((action, observation))
    }

    async fn call_llm_with_timeout(
        &self,
        messages: Vec<Message>,
        timeout: Duration,
        fallback: &str,
    ) -> String {
        match tokio::time::timeout(timeout, self.llm.complete(&messages, &InferenceOptions::default())).await {
            Ok(Ok(response)) => response.content,
            Ok(Err(e)) => {
                warn!(error = %e, "llm call failed; using fallback text");
                fallback.to_string()
            }
            Err(_) => {
                warn!("llm call timed out; using fallback text");
                fallback.to_string()
            }
        }
    }

    async fn fail(
        &self,
        mut state: AgentRunState,
        stream_tx: &Option<StepSender>,
        send_timeout: Duration,
        started: Instant,
        message: String,
    ) -> AgentRunState {
        error!(error = %message, "agent run failed");
        state.status = RunStatus::Failed;
        state.error = Some(message.clone());
        state.final_answer = Some(APOLOGY.to_string());
        state.total_execution_time_ms = started.elapsed().as_millis() as u64;
        emit(stream_tx, send_timeout, StepEvent::Error { message }).await;
        emit(stream_tx, send_timeout, StepEvent::Complete { status: state.status, quality_score: 0.0 }).await;
        state
    }

    async fn persist_interaction(&self, state: &AgentRunState) {
        let Some(conversation_id) = state.conversation_id else { return };
        let Some(answer) = &state.final_answer else { return };
        if let Err(e) = self
            .context_builder
            .save_interaction(state.user_id, conversation_id, state.query.clone(), answer.clone(), HashMap::new())
            .await
        {
            warn!(error = %e, "failed to persist interaction history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContextStore;
    use crate::llm::MockInferenceProvider;
    use crate::rag::{HashEmbedder, InMemoryVectorIndex, Indexer, RagEngine};
    use crate::registry::types::{ParameterSchema, UsageStats};
    use crate::registry::store::InMemoryStore;
    use crate::types::HttpMethod;

    fn weather_schema() -> crate::registry::types::FunctionSchema {
        crate::registry::types::FunctionSchema {
            function_id: "get_weather".to_string(),
            name: "get_weather".to_string(),
            description: "Get current weather for a location".to_string(),
            category: "weather".to_string(),
            endpoint: "http://127.0.0.1:0/weather".to_string(),
            http_method: HttpMethod::Get,
            auth_required: false,
            parameters: ParameterSchema {
                properties: Default::default(),
                required: vec![],
            },
            response_schema: None,
            cache_ttl_seconds: 0,
            timeout_seconds: 1,
            tags: vec![],
            deprecated: false,
            version: 1,
            usage: UsageStats::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    async fn build_controller(
        scripted_llm_responses: Vec<String>,
        register_weather: bool,
    ) -> ReactController {
        let store: Arc<dyn crate::registry::store::Store> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(Registry::new(store));
        let rag_engine = Arc::new(RagEngine::new(Arc::new(HashEmbedder::new(32)), Arc::new(InMemoryVectorIndex::new())));
        if register_weather {
            let schema = weather_schema();
            registry.create(schema.clone()).await.unwrap();
            rag_engine.index(&schema).await.unwrap();
        }
        let llm: Arc<dyn InferenceProvider> = Arc::new(MockInferenceProvider::new(scripted_llm_responses));
        let selector = Arc::new(HybridSelector::new(rag_engine.clone(), llm.clone(), 0.85, 20, 5));
        let context_builder = Arc::new(ContextBuilder::new(Arc::new(InMemoryContextStore::new())));
        let executor = Arc::new(RetryExecutor::new(registry.clone(), "agentflow", "0.1.0", None));
        let mut agent_config = AgentConfig::default();
        agent_config.max_steps = 2;
        ReactController::new(context_builder, selector, registry, executor, llm, agent_config, StreamingConfig::default())
    }

    #[tokio::test]
    async fn empty_retrieval_synthesizes_direct_answer() {
        let controller = build_controller(vec!["Hello! How can I help?".to_string()], false).await;
        let state = controller.run(UserId::new(), "hello".to_string(), None, None).await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.quality_score, 0.0);
        assert!(state.actions.is_empty());
        assert!(state.observations.is_empty());
        assert_eq!(state.final_answer.as_deref(), Some("Hello! How can I help?"));
    }

    #[tokio::test]
    async fn run_respects_step_and_ordering_invariants() {
        let scripted = vec![
            "I need to call get_weather for this.".to_string(),
            "Function: get_weather".to_string(),
            "Quality: 0.1\nContinue: yes\nReasoning: trying again".to_string(),
        ];
        let controller = build_controller(scripted, true).await;
        let state = controller
            .run(UserId::new(), "What's the weather in Hanoi?".to_string(), None, None)
            .await;

        // P1 / I2
        assert!(state.actions.len() <= state.observations.len());
        assert!(state.observations.len() <= state.thoughts.len());
        assert!(state.current_step <= state.max_steps);
        assert!(state.final_answer.is_some());
    }
}
