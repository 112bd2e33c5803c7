//! 执行循环：相位状态机
//!
//! start 同步完成 idle → setup → task_initiation，随后由一个后台任务驱动其余相位。
//! 后台任务每轮迭代检查一次取消信号与总超时；不抢占进行中的模型或工具调用。
//! 任何退出路径（完成、stop、上级取消、超时、致命错误）都先经过 state_cleanup 再回到 idle。
//! 相位由后台任务自己持有，发布 idle 后立即退出；start / wait 在此之后回收其句柄。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::state::{CompletionReason, LoopState, Phase, RunOutcome, StatusSnapshot, ToolTier};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::env::Environment;
use crate::llm::{LlmClient, Message};
use crate::react::events::EventKind;
use crate::react::nested::{NestedStateStack, DEFAULT_MAX_NESTED_DEPTH};
use crate::react::parser::{parse_action, EXIT_ACTION, SUBMIT_ACTION};
use crate::react::tier::TierPolicy;
use crate::tools::{declarations_prompt, ActionDispatcher, DispatchStatus, ToolDefinition};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent working inside a sandboxed environment. \
Think step by step, then give exactly one action in a ```tool block, for example:\n\
```tool\nshell ls -la\n```\n\
When the task is done, reply with a ```tool block containing `submit`.";

pub const DEFAULT_COMPLETION_KEYWORDS: &[&str] =
    &["task completed", "task complete", "mission accomplished"];

/// 事件里的文本预览上限（字符）
const PREVIEW_CHARS: usize = 200;

const FALLBACK_NOTE: &str =
    "The previous step failed and the environment session was reset. Continue the task, trying a different approach if needed.";

/// 循环运行参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_steps: usize,
    pub max_nested_depth: usize,
    pub total_timeout: Duration,
    /// 每 N 步做一次层级检查点；0 表示只在 tool_discovery 检查
    pub evaluation_interval: usize,
    pub completion_keywords: Vec<String>,
    pub tool_timeout: Duration,
    pub max_consecutive_timeouts: usize,
    /// 会话创建 / 重置的超时
    pub env_timeout: Duration,
    pub system_prompt: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_nested_depth: DEFAULT_MAX_NESTED_DEPTH,
            total_timeout: Duration::from_secs(1800),
            evaluation_interval: 3,
            completion_keywords: DEFAULT_COMPLETION_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tool_timeout: Duration::from_secs(30),
            max_consecutive_timeouts: 3,
            env_timeout: Duration::from_secs(30),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl LoopSettings {
    /// 观察或思考中命中的第一个完成关键词（大小写不敏感）
    pub fn completion_keyword(&self, observation: &str, thought: &str) -> Option<&str> {
        let observation = observation.to_lowercase();
        let thought = thought.to_lowercase();
        self.completion_keywords
            .iter()
            .map(|k| k.as_str())
            .find(|k| {
                let k = k.to_lowercase();
                !k.is_empty() && (observation.contains(&k) || thought.contains(&k))
            })
    }
}

/// 后台任务与控制面共享的部件
#[derive(Clone)]
struct LoopDeps {
    state: Arc<RwLock<LoopState>>,
    phase_tx: Arc<watch::Sender<Phase>>,
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ActionDispatcher>,
    environment: Arc<dyn Environment>,
    tiers: Arc<TierPolicy>,
    recovery: RecoveryEngine,
    settings: Arc<LoopSettings>,
}

struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 执行循环：同一时刻至多一个运行
pub struct ExecutionLoop {
    deps: LoopDeps,
    run: Mutex<Option<ActiveRun>>,
    /// 上级关闭信号；每次运行的取消 token 由它派生
    shutdown: Option<CancellationToken>,
}

impl ExecutionLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: ActionDispatcher,
        environment: Arc<dyn Environment>,
        settings: LoopSettings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Self {
            deps: LoopDeps {
                state: Arc::new(RwLock::new(LoopState::new())),
                phase_tx: Arc::new(phase_tx),
                llm,
                dispatcher: Arc::new(dispatcher),
                environment,
                tiers: Arc::new(TierPolicy::default()),
                recovery: RecoveryEngine::new(),
                settings: Arc::new(settings),
            },
            run: Mutex::new(None),
            shutdown: None,
        }
    }

    pub fn with_tier_policy(mut self, tiers: TierPolicy) -> Self {
        self.deps.tiers = Arc::new(tiers);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.deps.recovery = recovery;
        self
    }

    /// 挂到上级关闭信号下：上级取消时当前运行经 state_cleanup 以 stopped 结束，之后的 start 返回 Cancelled
    pub fn with_shutdown(mut self, parent: CancellationToken) -> Self {
        self.shutdown = Some(parent);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.deps.settings
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.deps.dispatcher
    }

    /// 开始一次运行，返回 run id；当前不在 idle 时返回 AlreadyRunning
    pub async fn start(&self, task: impl Into<String>) -> Result<Uuid, AgentError> {
        let task = task.into();
        if self.shutdown.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(AgentError::Cancelled);
        }
        let mut run = self.run.lock().await;
        if self.deps.state.read().await.phase != Phase::Idle {
            return Err(AgentError::AlreadyRunning);
        }
        // 上一次运行已发布 idle，回收它的后台任务后再开始
        if let Some(previous) = run.take() {
            self.join(previous).await;
        }

        let run_id = Uuid::new_v4();
        {
            let mut state = self.deps.state.write().await;
            if state.phase != Phase::Idle {
                return Err(AgentError::AlreadyRunning);
            }
            state.reset_for_run(run_id, task.clone());
            for phase in [Phase::Setup, Phase::TaskInitiation] {
                state.transition(phase);
                self.deps.phase_tx.send_replace(phase);
            }
        }
        tracing::info!(run_id = %run_id, task = %task, "run started");

        let cancel = match &self.shutdown {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let runner = Runner::new(self.deps.clone(), cancel.clone(), Phase::TaskInitiation);
        let handle = tokio::spawn(runner.run());
        *run = Some(ActiveRun { cancel, handle });
        Ok(run_id)
    }

    /// 请求取消并等待运行回到 idle；已在 idle 时返回 NotRunning
    pub async fn stop(&self) -> Result<(), AgentError> {
        let active = {
            let mut run = self.run.lock().await;
            if self.deps.state.read().await.phase == Phase::Idle {
                return Err(AgentError::NotRunning);
            }
            run.take().ok_or(AgentError::NotRunning)?
        };
        tracing::info!("stop requested");
        active.cancel.cancel();
        self.join(active).await;
        Ok(())
    }

    /// 等待当前运行结束（不取消），后台任务退出后返回最终快照
    pub async fn wait(&self) -> StatusSnapshot {
        let mut rx = self.deps.phase_tx.subscribe();
        // 发送端由 self 持有，等待期间不会关闭
        let _ = rx.wait_for(|phase| *phase == Phase::Idle).await;
        {
            let mut run = self.run.lock().await;
            // 持有 run 锁期间不会有新运行开始；仍为 idle 说明句柄属于刚结束的运行
            if self.deps.state.read().await.phase == Phase::Idle {
                if let Some(finished) = run.take() {
                    self.join(finished).await;
                }
            }
        }
        self.status().await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.deps.state.read().await.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.deps.state.read().await.phase != Phase::Idle
    }

    /// 在状态锁内追加事件；索引类事件同步进入派生索引
    pub async fn add_event(&self, kind: EventKind, data: Value) {
        self.deps.state.write().await.push_event(kind, data);
    }

    /// 在状态锁内写入任务级临时数据（context.extra）；下一次 start 时清空
    pub async fn set_context(&self, key: impl Into<String>, value: Value) {
        self.deps.state.write().await.context.extra.insert(key.into(), value);
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.deps.phase_tx.subscribe()
    }

    async fn join(&self, active: ActiveRun) {
        if let Err(e) = active.handle.await {
            tracing::error!(error = %e, "run task ended abnormally");
            self.force_cleanup(format!("run task ended abnormally: {e}")).await;
        }
    }

    /// 后台任务异常退出时，代替它完成 state_cleanup → idle
    async fn force_cleanup(&self, error: String) {
        let mut state = self.deps.state.write().await;
        if state.phase == Phase::Idle {
            return;
        }
        if state.outcome.is_none() {
            state.outcome = Some(RunOutcome::Failed { error: error.clone() });
            state.last_error = Some(error.clone());
            state.push_event(EventKind::TaskFailed, json!({ "error": error }));
        }
        state.transition(Phase::StateCleanup);
        let now = Utc::now();
        state.context.cleanup_at = Some(now);
        state.current_action = None;
        state.push_event(EventKind::Cleanup, json!({ "cleared_frames": 0, "forced": true }));
        state.finished_at = Some(now);
        state.transition(Phase::Idle);
        self.deps.phase_tx.send_replace(Phase::Idle);
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

/// 单次运行的私有执行体：嵌套栈、对话历史、计数器都只属于这一次运行
struct Runner {
    deps: LoopDeps,
    cancel: CancellationToken,
    /// 本次运行的当前相位；共享状态里的 phase 只是它的发布副本
    phase: Phase,
    nested: NestedStateStack,
    history: Vec<Message>,
    started: Instant,
    fallbacks_used: u32,
    consecutive_timeouts: usize,
    /// 检查点之后回到 execute_step 时不再递增步数
    resume_step: bool,
    pending_error: Option<AgentError>,
}

impl Runner {
    fn new(deps: LoopDeps, cancel: CancellationToken, phase: Phase) -> Self {
        let max_depth = deps.settings.max_nested_depth;
        Self {
            deps,
            cancel,
            phase,
            nested: NestedStateStack::new(max_depth),
            history: Vec::new(),
            started: Instant::now(),
            fallbacks_used: 0,
            consecutive_timeouts: 0,
            resume_step: false,
            pending_error: None,
        }
    }

    async fn run(mut self) {
        while self.phase != Phase::Idle {
            let phase = self.phase;
            if phase != Phase::StateCleanup {
                if self.cancel.is_cancelled() {
                    let reason = AgentError::Cancelled.to_string();
                    tracing::info!(phase = %phase, "run cancelled");
                    self.finish_early(
                        RunOutcome::Stopped,
                        EventKind::Stopped,
                        json!({ "phase": phase.as_str(), "reason": reason }),
                    )
                    .await;
                    continue;
                }
                let limit = self.deps.settings.total_timeout;
                if self.started.elapsed() > limit {
                    let error = AgentError::TotalTimeout(limit.as_secs()).to_string();
                    tracing::error!(phase = %phase, error = %error, "total execution timeout");
                    self.finish_early(
                        RunOutcome::Failed { error: error.clone() },
                        EventKind::TaskFailed,
                        json!({ "error": error, "phase": phase.as_str() }),
                    )
                    .await;
                    continue;
                }
            }

            match self.handle(phase).await {
                Ok(next) => self.transition(next).await,
                Err(err) => self.fail_phase(phase, err).await,
            }
        }
        tracing::info!("run finished");
    }

    async fn handle(&mut self, phase: Phase) -> Result<Phase, AgentError> {
        match phase {
            Phase::Idle => Ok(Phase::Idle),
            Phase::Setup => Ok(Phase::TaskInitiation),
            Phase::TaskInitiation => self.task_initiation().await,
            Phase::AnalyzeRequirements => self.analyze_requirements().await,
            Phase::ToolDiscovery => self.tool_discovery().await,
            Phase::PlanningPhase => self.planning_phase().await,
            Phase::ExecutionPhase => self.execution_phase().await,
            Phase::ExecuteStep => self.execute_step().await,
            Phase::ToolTransitionEvaluation => self.tool_transition_evaluation().await,
            Phase::ToolbeltActivation => self.toolbelt_activation().await,
            Phase::CompletionVerification => self.completion_verification().await,
            Phase::StateCleanup => self.state_cleanup().await,
            Phase::ErrorHandling => self.error_handling().await,
            Phase::FallbackProcessing => self.fallback_processing().await,
        }
    }

    async fn transition(&mut self, to: Phase) {
        self.phase = to;
        let mut state = self.deps.state.write().await;
        let from = state.transition(to);
        tracing::info!(from = %from, to = %to, step = state.step_count, "phase transition");
        self.deps.phase_tx.send_replace(to);
    }

    async fn fail_phase(&mut self, phase: Phase, err: AgentError) {
        let message = err.to_string();
        tracing::warn!(phase = %phase, error = %message, "phase failed");
        {
            let mut state = self.deps.state.write().await;
            state.last_error = Some(message.clone());
            let step = state.step_count;
            state.push_event(
                EventKind::Error,
                json!({ "phase": phase.as_str(), "error": message, "step": step }),
            );
        }
        self.pending_error = Some(err);
        self.transition(Phase::ErrorHandling).await;
    }

    /// 取消 / 总超时：记录结果后直接进入 state_cleanup
    async fn finish_early(&mut self, outcome: RunOutcome, kind: EventKind, data: Value) {
        {
            let mut state = self.deps.state.write().await;
            if let RunOutcome::Failed { error } = &outcome {
                state.last_error = Some(error.clone());
            }
            state.outcome = Some(outcome);
            state.push_event(kind, data);
        }
        self.transition(Phase::StateCleanup).await;
    }

    async fn seed_history(&mut self) {
        let task = self.deps.state.read().await.task.clone().unwrap_or_default();
        self.history = vec![
            Message::system(self.deps.settings.system_prompt.clone()),
            Message::task(&task),
        ];
    }

    /// 层级检查点；发生升级时返回 true
    async fn checkpoint(&self, at: &str) -> bool {
        let mut state = self.deps.state.write().await;
        let task = state.task.clone().unwrap_or_default();
        let Some(decision) = self.deps.tiers.evaluate(&task, state.tool_tier, state.step_count) else {
            return false;
        };
        match state.escalate_tier(decision.to, &decision.reason) {
            Some((from, to)) => {
                tracing::info!(checkpoint = at, from = %from, to = %to, reason = %decision.reason, "tier escalated");
                true
            }
            None => false,
        }
    }

    /// 按当前层级刷新可用工具列表
    async fn refresh_toolbelt(&self) -> (ToolTier, Vec<ToolDefinition>) {
        let mut state = self.deps.state.write().await;
        let tier = state.tool_tier;
        let defs = self.deps.dispatcher.tool_declarations(tier);
        state.context.available_tools = defs.iter().map(|d| d.name.clone()).collect();
        (tier, defs)
    }

    async fn task_initiation(&mut self) -> Result<Phase, AgentError> {
        self.deps
            .environment
            .reset_session(self.deps.settings.env_timeout)
            .await?;
        self.seed_history().await;
        let mut state = self.deps.state.write().await;
        let task = state.task.clone().unwrap_or_default();
        let run_id = state.run_id.map(|id| id.to_string());
        state.push_event(EventKind::TaskStarted, json!({ "task": task, "run_id": run_id }));
        Ok(Phase::AnalyzeRequirements)
    }

    async fn analyze_requirements(&mut self) -> Result<Phase, AgentError> {
        let mut state = self.deps.state.write().await;
        let task = state.task.clone().unwrap_or_default();
        let matched = self.deps.tiers.matched_triggers(&task);
        tracing::info!(triggers = ?matched, "requirements analyzed");
        state.context.requirements = matched;
        Ok(Phase::ToolDiscovery)
    }

    async fn tool_discovery(&mut self) -> Result<Phase, AgentError> {
        self.checkpoint("tool_discovery").await;
        let (tier, defs) = self.refresh_toolbelt().await;
        tracing::info!(tier = %tier, tools = defs.len(), "tools discovered");
        Ok(Phase::PlanningPhase)
    }

    async fn planning_phase(&mut self) -> Result<Phase, AgentError> {
        let (tier, defs) = self.refresh_toolbelt().await;
        self.history.push(Message::system(format!(
            "Available tools (tier {tier}):\n{}\nUnrecognized actions run as shell commands.",
            declarations_prompt(&defs)
        )));
        let max_steps = self.deps.settings.max_steps;
        let mut state = self.deps.state.write().await;
        state.context.plan = Some(format!(
            "{} tools at tier {tier}, up to {max_steps} steps",
            defs.len()
        ));
        Ok(Phase::ExecutionPhase)
    }

    async fn execution_phase(&mut self) -> Result<Phase, AgentError> {
        let step_count = self.deps.state.read().await.step_count;
        if step_count >= self.deps.settings.max_steps {
            return Ok(Phase::CompletionVerification);
        }
        Ok(Phase::ExecuteStep)
    }

    async fn execute_step(&mut self) -> Result<Phase, AgentError> {
        let settings = self.deps.settings.clone();
        if !self.resume_step {
            let step = {
                let mut state = self.deps.state.write().await;
                state.step_count += 1;
                state.step_count
            };
            if settings.evaluation_interval > 0 && step % settings.evaluation_interval == 0 {
                self.resume_step = true;
                return Ok(Phase::ToolTransitionEvaluation);
            }
        }
        self.resume_step = false;

        let output = self.deps.llm.complete(&self.history).await?;
        let parsed = parse_action(&output.message);
        let step = {
            let mut state = self.deps.state.write().await;
            state.context.last_model_output = Some(output.message.clone());
            state.context.last_thought = Some(parsed.thought.clone());
            state.current_action = Some(parsed.action.clone());
            let step = state.step_count;
            state.push_event(
                EventKind::ActionParsed,
                json!({ "step": step, "thought": preview(&parsed.thought), "action": parsed.action }),
            );
            step
        };
        tracing::debug!(step, action = %parsed.action, "action parsed");
        self.history.push(Message::assistant(output.message));

        let signal = match parsed.head().as_str() {
            SUBMIT_ACTION => Some(CompletionReason::Submitted),
            EXIT_ACTION => Some(CompletionReason::Exited),
            _ => None,
        };
        if let Some(reason) = signal {
            self.deps.state.write().await.context.completion_signal = Some(reason);
            tracing::info!(step, reason = reason.as_str(), "completion signalled");
            return Ok(Phase::CompletionVerification);
        }

        let tier = {
            let mut state = self.deps.state.write().await;
            if let Some(decision) = TierPolicy::auto_escalation(state.tool_tier, &parsed.action) {
                if state.escalate_tier(decision.to, &decision.reason).is_some() {
                    tracing::info!(step, from = %decision.from, to = %decision.to, "tier auto-escalated");
                }
            }
            let depth = self.nested.push(&state.context)?;
            state.nested_high_water = self.nested.high_water();
            state.push_event(EventKind::NestedPush, json!({ "depth": depth, "step": step }));
            state.tool_tier
        };

        let dispatched = self
            .deps
            .dispatcher
            .dispatch(&parsed.action, tier, Some(settings.tool_timeout))
            .await;

        {
            let mut state = self.deps.state.write().await;
            let depth = self.nested.pop(&mut state.context)?;
            state.push_event(EventKind::NestedPop, json!({ "depth": depth, "step": step }));
        }
        let outcome = dispatched?;

        let observation = outcome.observation.clone();
        {
            let mut state = self.deps.state.write().await;
            state.context.last_observation = Some(observation.clone());
            state.push_event(
                EventKind::ToolDispatched,
                json!({
                    "step": step,
                    "tool": outcome.tool,
                    "status": outcome.status.as_str(),
                    "fallback": outcome.fallback,
                    "truncated": outcome.truncated,
                    "duration_ms": outcome.duration_ms,
                }),
            );
            state.push_event(
                EventKind::Observation,
                json!({ "step": step, "preview": preview(&observation) }),
            );
        }
        self.history.push(Message::observation(&observation));

        if outcome.status == DispatchStatus::TimedOut {
            self.consecutive_timeouts += 1;
            if self.consecutive_timeouts > settings.max_consecutive_timeouts {
                return Err(AgentError::ToolTimeout(format!(
                    "{} consecutive tool timeouts (last tool: {})",
                    self.consecutive_timeouts, outcome.tool
                )));
            }
        } else {
            self.consecutive_timeouts = 0;
        }

        if let Some(keyword) = settings.completion_keyword(&observation, &parsed.thought) {
            tracing::info!(step, keyword = %keyword, "completion keyword matched");
            self.deps.state.write().await.context.completion_signal =
                Some(CompletionReason::KeywordMatched);
            return Ok(Phase::CompletionVerification);
        }
        if step >= settings.max_steps {
            tracing::info!(step, "step ceiling reached");
            return Ok(Phase::CompletionVerification);
        }
        Ok(Phase::ExecuteStep)
    }

    async fn tool_transition_evaluation(&mut self) -> Result<Phase, AgentError> {
        if self.checkpoint("execute_step").await {
            Ok(Phase::ToolbeltActivation)
        } else {
            Ok(Phase::ExecuteStep)
        }
    }

    async fn toolbelt_activation(&mut self) -> Result<Phase, AgentError> {
        let (tier, defs) = self.refresh_toolbelt().await;
        self.history.push(Message::system(format!(
            "Tool tier is now {tier}. Available tools:\n{}",
            declarations_prompt(&defs)
        )));
        tracing::info!(tier = %tier, tools = defs.len(), "toolbelt activated");
        Ok(Phase::ExecuteStep)
    }

    async fn completion_verification(&mut self) -> Result<Phase, AgentError> {
        let mut state = self.deps.state.write().await;
        let reason = state
            .context
            .completion_signal
            .unwrap_or(CompletionReason::StepCeiling);
        let steps = state.step_count;
        state.outcome = Some(RunOutcome::Completed { reason });
        state.push_event(
            EventKind::TaskCompleted,
            json!({ "reason": reason.as_str(), "steps": steps }),
        );
        tracing::info!(reason = reason.as_str(), steps, "task completed");
        Ok(Phase::StateCleanup)
    }

    async fn state_cleanup(&mut self) -> Result<Phase, AgentError> {
        let cleared = self.nested.clear();
        let mut state = self.deps.state.write().await;
        let now = Utc::now();
        state.context.cleanup_at = Some(now);
        state.current_action = None;
        let step = state.step_count;
        state.push_event(EventKind::Cleanup, json!({ "cleared_frames": cleared, "step": step }));
        state.finished_at = Some(now);
        if cleared > 0 {
            tracing::warn!(cleared, "nested frames left at cleanup");
        }
        Ok(Phase::Idle)
    }

    async fn error_handling(&mut self) -> Result<Phase, AgentError> {
        let err = self.pending_error.take().unwrap_or_else(|| {
            AgentError::Infrastructure("error handling entered without an error".to_string())
        });
        let message = err.to_string();
        let mut state = self.deps.state.write().await;
        match self.deps.recovery.handle(&err, self.fallbacks_used) {
            RecoveryAction::Fallback => {
                self.fallbacks_used += 1;
                state.push_event(
                    EventKind::Fallback,
                    json!({ "error": message, "attempt": self.fallbacks_used }),
                );
                tracing::warn!(error = %message, attempt = self.fallbacks_used, "attempting fallback");
                Ok(Phase::FallbackProcessing)
            }
            RecoveryAction::Abort => {
                state.last_error = Some(message.clone());
                state.outcome = Some(RunOutcome::Failed { error: message.clone() });
                state.push_event(EventKind::TaskFailed, json!({ "error": message }));
                tracing::error!(error = %message, "task failed");
                Ok(Phase::StateCleanup)
            }
        }
    }

    async fn fallback_processing(&mut self) -> Result<Phase, AgentError> {
        self.deps.state.write().await.context.using_fallback = true;
        self.consecutive_timeouts = 0;
        self.resume_step = false;
        self.deps
            .environment
            .reset_session(self.deps.settings.env_timeout)
            .await?;
        if self.history.is_empty() {
            self.seed_history().await;
        }
        self.history.push(Message::user(FALLBACK_NOTE));
        Ok(Phase::ExecutionPhase)
    }
}
