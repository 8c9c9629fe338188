// tests/react_engine_test.rs — Integration test: persona sessions through the ReAct engine

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tuneloop::core::budget::{PriorityMode, TimeBudget};
use tuneloop::core::contracts::PersonaDraft;
use tuneloop::core::executor::{AbortReason, EngineSettings, ReactEngine};
use tuneloop::core::react_parser::CompletionPolicy;
use tuneloop::infra::config::ModuleSeed;
use tuneloop::infra::errors::EngineError;
use tuneloop::memory::{MemoryManager, VersionStore};
use tuneloop::persona::Persona;
use tuneloop::provider::{ChatRequest, ChatResponse, InferenceService, TokenUsage};
use tuneloop::simulation::task::SimulationTask;
use tuneloop::simulation::tools::simulation_registry;
use tuneloop::simulation::Simulator;

const MODULE_PREFIX: &str = "MODULE:";

/// Module calls (system prompt starts with the module payload) get a canned
/// product output; persona turns come from the script, one per call.
struct MockService {
    script: Mutex<Vec<String>>,
    module_calls: Mutex<u32>,
}

impl MockService {
    fn new(script: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
            module_calls: Mutex::new(0),
        })
    }

    fn module_calls(&self) -> u32 {
        *self.module_calls.lock().unwrap()
    }
}

#[async_trait]
impl InferenceService for MockService {
    fn id(&self) -> &str {
        "mock"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, EngineError> {
        if req
            .system
            .as_deref()
            .is_some_and(|s| s.starts_with(MODULE_PREFIX))
        {
            *self.module_calls.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_millis(200)).await;
            return Ok(ChatResponse::text("Experienced analyst with SQL and Tableau."));
        }

        let prompt = req.last_user_message().unwrap_or_default().to_string();
        if prompt.contains("slow scenario") {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        let reply = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };
        Ok(ChatResponse {
            content: reply,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
        })
    }
}

fn modules() -> Vec<ModuleSeed> {
    vec![ModuleSeed {
        key: "resume_builder".into(),
        description: "Builds resumes".into(),
        initial_payload: format!("{MODULE_PREFIX} You write resumes."),
    }]
}

fn persona(name: &str, scenario: &str) -> Persona {
    Persona::from_draft(
        PersonaDraft {
            name: name.into(),
            target_role: "data analyst".into(),
            years_of_experience: 3,
            goals: vec!["a sharper resume".into()],
            scenario: scenario.into(),
            ..Default::default()
        },
        1,
        5,
    )
}

fn simulator(service: Arc<MockService>, budget_ms: u64, module_cost_ms: u64) -> Simulator {
    let versions = VersionStore::new(MemoryManager::in_memory().unwrap().into_shared());
    versions.seed(&modules()).unwrap();
    let tools = simulation_registry(
        service.clone(),
        versions,
        modules(),
        TimeBudget::new(5_000, PriorityMode::Speed),
        module_cost_ms,
    );
    let settings = EngineSettings {
        budget: TimeBudget::new(budget_ms, PriorityMode::Balanced),
        avg_step_cost_ms: 1_000,
        policy: CompletionPolicy::default(),
        max_tokens: 512,
        temperature: 0.0,
    };
    Simulator::new(Arc::new(ReactEngine::new(service, Arc::new(tools), settings)), 2)
}

fn task() -> SimulationTask {
    SimulationTask::new(vec!["resume_builder".into()])
}

#[tokio::test(start_paused = true)]
async fn test_session_uses_module_and_reports_issue() {
    let service = MockService::new(&[
        "Thought: let me try the resume builder\nAction: use_module\nAction Input: {\"module\": \"resume_builder\", \"input\": \"3 years SQL\"}",
        "Thought: too vague\nAction: report_issue\nAction Input: {\"issue\": \"Resume lacks numbers\"}",
        "Thought: done\nFinal Answer: {\"summary\": \"Got a usable resume\", \"goal_achieved\": true, \"friction_points\": [\"resume lacks numbers\"]}",
    ]);
    let sim = simulator(service.clone(), 60_000, 1_000)
        .simulate("run-1", 1, &persona("Ana", "Applying to analyst roles"), &task())
        .await;

    assert!(sim.outcome.completed_successfully);
    assert!(sim.outcome.goal_achieved);
    assert_eq!(sim.modules_used, vec!["resume_builder"]);
    // The reported issue and the final answer's friction point are the same issue.
    assert_eq!(sim.friction_points, vec!["Resume lacks numbers"]);
    assert_eq!(sim.summary, "Got a usable resume");
    assert_eq!(sim.steps, 3);
    assert_eq!(sim.tokens, 360);
    assert_eq!(service.module_calls(), 1);
    assert!(sim.transcript.contains("SQL and Tableau"));
    assert!(sim.grade.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_module_call_skipped_when_budget_too_small() {
    let service = MockService::new(&[
        "Thought: try it\nAction: use_module\nAction Input: {\"module\": \"resume_builder\", \"input\": \"cv\"}",
    ]);
    let sim = simulator(service.clone(), 5_000, 6_000)
        .simulate("run-1", 1, &persona("Ana", "Applying"), &task())
        .await;

    assert!(!sim.outcome.completed_successfully);
    assert!(!sim.outcome.error_encountered);
    assert_eq!(service.module_calls(), 0);
    let reason = sim.abort_reason.unwrap();
    assert_eq!(
        reason,
        AbortReason::InsufficientTimeForTool {
            tool: "use_module".into(),
            estimated_ms: 6_000,
            remaining_ms: 5_000,
        }
        .to_string()
    );
    assert_eq!(sim.summary, reason);
}

#[tokio::test(start_paused = true)]
async fn test_simulate_all_keeps_persona_order() {
    let service = MockService::new(&["Thought: done\nFinal Answer: {\"summary\": \"fine\", \"goal_achieved\": false}"]);
    let personas = vec![
        persona("First", "slow scenario"),
        persona("Second", "quick scenario"),
        persona("Third", "quick scenario"),
    ];
    let sims = simulator(service, 60_000, 1_000)
        .simulate_all("run-1", 1, &personas, &task())
        .await;

    let names: Vec<&str> = sims.iter().map(|s| s.persona_name.as_str()).collect();
    assert_eq!(names, vec!["First", "Second", "Third"]);
    assert!(sims.iter().all(|s| s.outcome.completed_successfully));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_module_is_an_observation_not_a_failure() {
    let service = MockService::new(&[
        "Thought: try\nAction: use_module\nAction Input: {\"module\": \"cover_letter\", \"input\": \"hi\"}",
        "Thought: that failed\nFinal Answer: {\"summary\": \"module missing\", \"goal_achieved\": false, \"abandoned\": true}",
    ]);
    let sim = simulator(service, 60_000, 1_000)
        .simulate("run-1", 1, &persona("Ana", "Applying"), &task())
        .await;

    assert!(sim.outcome.completed_successfully);
    assert!(sim.outcome.abandoned);
    assert!(sim.transcript.contains("cover_letter"));
}

#[tokio::test(start_paused = true)]
async fn test_heuristic_completion_with_brackets_is_final() {
    let service = MockService::new(&["I have sufficient information (the resume builder [v1] helped)."]);
    let sim = simulator(service, 60_000, 1_000)
        .simulate("run-1", 1, &persona("Ana", "Applying to analyst roles"), &task())
        .await;

    assert!(sim.outcome.completed_successfully);
    assert!(!sim.outcome.error_encountered);
    assert!(sim.abort_reason.is_none());
    assert!(sim.summary.contains("[v1]"));
}
