//! Job processor: routes a task and runs its skills in order.
//!
//! Flow:
//! 1. Routing: the router picks persona, skills and executor
//! 2. Executing: each routed skill runs under its step's timeout and retries
//! 3. Gating: template gates are checked against the checks skills passed
//!
//! A non-optional skill failure halts the job; later skills never run.
//! Faults in the pipeline's own control flow also end in a failed result.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::context::{TaskContext, TaskStatus};
use crate::error::PipelineError;
use crate::pipeline::job_type::{JobType, JobTypeCatalog, RetryPolicy, SkillStep};
use crate::pipeline::router::Router;
use crate::pipeline::types::{JobResult, JobTrail};
use crate::skills::{Skill, SkillRegistry, SkillResult};

/// Attempt timeout for steps that do not declare one.
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub step_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

/// Why a job stopped short of `completed`.
enum Halt {
    /// A skill or gate rejected the job. Carries the user-facing error.
    Rejected(String),
    Fault(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Self::Fault(e)
    }
}

pub struct JobProcessor {
    router: Router,
    skills: Arc<SkillRegistry>,
    job_types: Arc<JobTypeCatalog>,
    config: PipelineConfig,
}

impl JobProcessor {
    pub fn new(router: Router, skills: Arc<SkillRegistry>, job_types: Arc<JobTypeCatalog>) -> Self {
        Self {
            router,
            skills,
            job_types,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one task to a terminal result. Never returns an error; every
    /// failure is folded into a `failed` [`JobResult`].
    pub async fn process(&self, ctx: TaskContext) -> JobResult {
        self.process_inner(ctx, None).await
    }

    /// Like [`process`](Self::process), but the whole job must finish within
    /// `limit`. An overrun stops the running skill and fails the job with the
    /// trail, outputs and routing gathered so far.
    pub async fn process_within(&self, ctx: TaskContext, limit: Duration) -> JobResult {
        self.process_inner(ctx, Some(limit)).await
    }

    async fn process_inner(&self, mut ctx: TaskContext, limit: Option<Duration>) -> JobResult {
        let started = Instant::now();
        let mut trail = JobTrail::default();
        info!(
            task_id = %ctx.task_id,
            job_type = %ctx.job_type,
            repo = ctx.repo.as_deref().unwrap_or("none"),
            "Processing job"
        );

        let outcome = match limit {
            None => self.run(&mut ctx, &mut trail).await,
            Some(limit) => {
                // Dropping `run` on expiry releases the borrows; ctx and trail
                // keep everything recorded before the deadline.
                let timed = tokio::time::timeout(limit, self.run(&mut ctx, &mut trail)).await;
                match timed {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        if ctx.status == TaskStatus::Executing {
                            if let Some(step) = ctx.current_step.clone() {
                                trail.log(format!("Skill '{step}' interrupted by job timeout"));
                                trail.failed.push(step);
                            }
                        }
                        Err(Halt::Fault(PipelineError::JobTimeout(limit)))
                    }
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!(
                    task_id = %ctx.task_id,
                    executed = ?trail.executed,
                    skipped = ?trail.skipped,
                    elapsed_ms,
                    "Job completed"
                );
                JobResult::completed(&ctx, trail)
            }
            Err(Halt::Rejected(reason)) => {
                warn!(task_id = %ctx.task_id, error = %reason, elapsed_ms, "Job failed");
                mark_failed(&mut ctx);
                JobResult::failed(&ctx, trail, reason)
            }
            Err(Halt::Fault(e)) => {
                error!(task_id = %ctx.task_id, error = %e, elapsed_ms, "Pipeline fault");
                trail.log(format!("Pipeline error: {e}"));
                mark_failed(&mut ctx);
                JobResult::failed(&ctx, trail, e.to_string())
            }
        }
    }

    async fn run(&self, ctx: &mut TaskContext, trail: &mut JobTrail) -> Result<(), Halt> {
        let job_type = self.job_type_for(ctx);

        // ── Routing ─────────────────────────────────────────────────
        ctx.transition_to(TaskStatus::Routing, None)?;
        if ctx.is_routed() {
            debug!(task_id = %ctx.task_id, "Routing already set, skipping router");
            trail.log(format!(
                "Using preset routing: persona={}",
                ctx.persona.as_deref().unwrap_or("none")
            ));
        } else {
            let decision = self.router.route(ctx).await;
            trail.log(format!(
                "Routed: persona={} skills=[{}] executor={}",
                decision.persona,
                decision.skills.join(", "),
                decision.executor.as_deref().unwrap_or("none")
            ));
            ctx.set_routing(decision.persona, decision.skills, decision.executor)?;
        }
        if let (Some(required), Some(persona)) = (&job_type.required_persona, &ctx.persona) {
            if required != persona {
                warn!(
                    task_id = %ctx.task_id,
                    job_type = %job_type.name,
                    required = %required,
                    persona = %persona,
                    "Routed persona differs from job type's persona"
                );
            }
        }

        // ── Executing ───────────────────────────────────────────────
        let mut checks: HashSet<String> = HashSet::new();
        for name in ctx.skills.clone() {
            let Some(skill) = self.skills.get(&name) else {
                warn!(task_id = %ctx.task_id, skill = %name, "Skill not registered, skipping");
                trail.log(format!("Skill '{name}' not registered, skipping"));
                trail.skipped.push(name);
                continue;
            };

            ctx.transition_to(TaskStatus::Executing, Some(name.clone()))?;
            let step = job_type.step(&name);
            if let Some(step) = step {
                seed_inputs(ctx, step);
            }

            let result = self
                .run_step(ctx, skill.as_ref(), step, &job_type.retry_policy, trail)
                .await?;

            if result.is_success() {
                ctx.merge_outputs(result.outputs);
                ctx.merge_artifacts(result.artifacts);
                for update in result.context_updates {
                    ctx.apply_update(update);
                }
                checks.extend(result.passed_checks);
                trail.executed.push(name);
                continue;
            }

            let reason = result
                .error
                .unwrap_or_else(|| format!("Skill {name} failed"));
            trail.failed.push(name.clone());
            if step.is_some_and(|s| s.optional) {
                warn!(task_id = %ctx.task_id, skill = %name, error = %reason, "Optional skill failed, continuing");
                trail.log(format!("Optional skill '{name}' failed, continuing: {reason}"));
                continue;
            }
            warn!(task_id = %ctx.task_id, skill = %name, error = %reason, "Skill failed");
            trail.log(format!("Skill '{name}' failed: {reason}"));
            return Err(Halt::Rejected(reason));
        }

        // ── Gating ──────────────────────────────────────────────────
        ctx.transition_to(TaskStatus::Gating, None)?;
        for gate in &job_type.gates {
            if checks.contains(&gate.condition) {
                debug!(task_id = %ctx.task_id, gate = %gate.name, "Gate satisfied");
                trail.log(format!("Gate '{}' satisfied", gate.name));
            } else if gate.required {
                trail.log(format!("Gate '{}' not satisfied", gate.name));
                return Err(Halt::Rejected(format!("Gate '{}' not satisfied", gate.name)));
            } else {
                info!(task_id = %ctx.task_id, gate = %gate.name, "Advisory gate not satisfied");
                trail.log(format!("Advisory gate '{}' not satisfied", gate.name));
            }
        }

        ctx.transition_to(TaskStatus::Completed, None)?;
        Ok(())
    }

    /// Run one skill with its step's timeout and retries. Returns the final
    /// attempt's result; panics surface as a pipeline fault.
    async fn run_step(
        &self,
        ctx: &TaskContext,
        skill: &dyn Skill,
        step: Option<&SkillStep>,
        policy: &RetryPolicy,
        trail: &mut JobTrail,
    ) -> Result<SkillResult, PipelineError> {
        let name = skill.name();
        let retries = step.map_or(policy.max_retries, |s| s.retry_count);
        let timeout = step
            .and_then(|s| s.timeout_seconds)
            .map_or(self.config.step_timeout, Duration::from_secs);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = policy.delay(attempt);
                info!(
                    task_id = %ctx.task_id,
                    skill = %name,
                    attempt,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying skill"
                );
                trail.log(format!("Retrying '{name}' ({attempt}/{retries})"));
                tokio::time::sleep(delay).await;
            }

            debug!(task_id = %ctx.task_id, skill = %name, attempt, "Running skill");
            let run = AssertUnwindSafe(skill.run(ctx)).catch_unwind();
            let result = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    return Err(PipelineError::SkillPanicked {
                        skill: name.to_string(),
                        message: panic_message(panic.as_ref()),
                    });
                }
                Err(_) => SkillResult::failure(format!(
                    "Skill {name} timed out after {}s",
                    timeout.as_secs_f64()
                )),
            };

            for line in &result.logs {
                trail.log(format!("[{name}] {line}"));
            }
            if result.is_success() || attempt >= retries {
                return Ok(result);
            }
            attempt += 1;
        }
    }

    /// The job's template. Unknown job types run with an empty template.
    fn job_type_for(&self, ctx: &TaskContext) -> JobType {
        match self.job_types.get(&ctx.job_type) {
            Some(job_type) => job_type.clone(),
            None => {
                warn!(task_id = %ctx.task_id, job_type = %ctx.job_type, "Unknown job type, running without template");
                JobType {
                    name: ctx.job_type.clone(),
                    description: String::new(),
                    required_persona: None,
                    steps: Vec::new(),
                    gates: Vec::new(),
                    retry_policy: RetryPolicy::default(),
                    metadata: Default::default(),
                }
            }
        }
    }
}

/// Step inputs fill `outputs` keys nothing has set yet.
fn seed_inputs(ctx: &mut TaskContext, step: &SkillStep) {
    for (key, value) in &step.inputs {
        if !ctx.outputs.contains_key(key) {
            ctx.outputs.insert(key.clone(), value.clone());
        }
    }
}

fn mark_failed(ctx: &mut TaskContext) {
    let step = ctx.current_step.clone();
    if let Err(e) = ctx.transition_to(TaskStatus::Failed, step) {
        debug!(task_id = %ctx.task_id, error = %e, "Context already terminal");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
