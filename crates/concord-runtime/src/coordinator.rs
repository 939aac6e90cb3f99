//! Coordinator: the run state machine.
//!
//! A run moves through fixed phases:
//! - PLANNING: the planner drafts steps; roles are resolved once, here
//! - SPECIALISTS: one evaluator call per step, all joined before moving on
//! - AGGREGATING: the pure aggregator merges the results
//! - CONSTRAINT_CHECK / JUDGMENT: a bounded review loop carrying feedback
//! - RESOLUTION: the approved decision is applied step by step
//! - FINALIZE: the run is frozen into a report
//!
//! Collaborator failures are absorbed into typed results. Only a planning
//! failure, cancellation or the run deadline end a run early, and every run
//! reaches FINALIZE.

use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use concord_core::{
    interpret_reply, Aggregator, CompositeDecision, ConstraintResult, Context, FinalReport,
    Interruption, JudgmentResult, Phase, Plan, PlanStep, ReviewRound, Role, RunState,
    SpecialistResult, Validate,
};

use crate::archive::ReportArchive;
use crate::collaborators::{
    ConstraintChecker, Evaluator, FixedStability, JudgmentArbiter, Planner, StabilityPolicy,
    StepProposer,
};
use crate::config::RunOptions;
use crate::control::{CancelSignal, ProgressEvent, RunControls};
use crate::resolution::Resolution;

/// Errors from assembling a coordinator.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Collaborator not configured: {0}")]
    NotConfigured(&'static str),

    #[error("No evaluators registered")]
    NoEvaluators,
}

/// Cancellation, deadline and event plumbing for one run.
struct RunScope {
    run_id: Uuid,
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
    events: Option<tokio::sync::mpsc::UnboundedSender<ProgressEvent>>,
}

impl RunScope {
    fn new(run_id: Uuid, options: &RunOptions, controls: RunControls) -> Self {
        Self {
            run_id,
            // A deadline past the clock's range is no deadline at all.
            deadline: options
                .deadline
                .and_then(|d| Instant::now().checked_add(d)),
            cancel: controls.cancel,
            events: controls.events,
        }
    }

    /// Fails if the run was cancelled or its deadline has passed.
    fn checkpoint(&self) -> Result<(), Interruption> {
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(Interruption::Cancelled);
        }
        if self.deadline.is_some_and(|at| Instant::now() >= at) {
            return Err(Interruption::DeadlineExceeded);
        }
        Ok(())
    }

    /// Await `work` unless the run is cancelled or its deadline passes first.
    ///
    /// On interruption `work` is dropped, discarding anything in flight.
    async fn guard<F: Future>(&self, work: F) -> Result<F::Output, Interruption> {
        let cancelled = async {
            match &self.cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Interruption::Cancelled),
            _ = expired => Err(Interruption::DeadlineExceeded),
            output = work => Ok(output),
        }
    }

    /// Send a progress event. A missing or closed receiver is ignored.
    fn emit(&self, phase: Phase, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            let _ = events.send(ProgressEvent {
                run_id: self.run_id,
                phase,
                timestamp: chrono::Utc::now(),
                payload,
            });
        }
    }

    /// Cross a phase boundary: check for interruption, record, announce.
    fn enter(
        &self,
        state: &mut RunState,
        phase: Phase,
        payload: serde_json::Value,
    ) -> Result<(), Interruption> {
        self.checkpoint()?;
        state.enter(phase);
        tracing::debug!(phase = %phase, "Entering phase");
        self.emit(phase, payload);
        Ok(())
    }
}

/// The run coordinator.
///
/// Holds only injected collaborators; each run owns its own [`RunState`], so
/// one coordinator can serve concurrent runs.
pub struct Coordinator {
    planner: Arc<dyn Planner>,
    evaluators: BTreeMap<Role, Arc<dyn Evaluator>>,
    constraint: Arc<dyn ConstraintChecker>,
    judgment: Arc<dyn JudgmentArbiter>,
    proposer: Arc<dyn StepProposer>,
    stability: Arc<dyn StabilityPolicy>,
    archive: Option<Arc<dyn ReportArchive>>,
    aggregator: Aggregator,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Roles with a registered evaluator.
    pub fn roles(&self) -> Vec<Role> {
        self.evaluators.keys().copied().collect()
    }

    /// Run a request end to end.
    pub async fn run_scenario(
        &self,
        request: &str,
        context: Context,
        options: &RunOptions,
    ) -> FinalReport {
        self.run_scenario_with(request, context, options, RunControls::default())
            .await
    }

    /// Run a request end to end with cancellation and progress events.
    ///
    /// Always returns a report; failures are encoded in its status.
    pub async fn run_scenario_with(
        &self,
        request: &str,
        context: Context,
        options: &RunOptions,
        controls: RunControls,
    ) -> FinalReport {
        let mut state =
            RunState::new(request, context, options.retry_bound).with_seed(options.seed);
        let scope = RunScope::new(state.run_id(), options, controls);
        let span = tracing::info_span!("run", run_id = %state.run_id());

        async move {
            tracing::info!(
                retry_bound = options.retry_bound,
                resolution_steps = options.resolution_steps,
                deadline = ?options.deadline,
                seed = ?options.seed,
                "Run started"
            );
            if let Err(reason) = self.drive(&mut state, &scope, options).await {
                tracing::warn!(reason = %reason, phase = ?state.current_phase(), "Run interrupted");
                state.interrupt(reason);
            }

            let report = state.finalize();
            scope.emit(
                Phase::Finalize,
                json!({ "status": report.status, "retry_count": report.retry_count }),
            );
            tracing::info!(status = %report.status, retries = report.retry_count, "Run finished");

            if let Some(archive) = &self.archive {
                if let Err(e) = archive.store(&report).await {
                    tracing::warn!(error = %e, "Failed to archive report");
                }
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        state: &mut RunState,
        scope: &RunScope,
        options: &RunOptions,
    ) -> Result<(), Interruption> {
        let payload = json!({ "request": state.request() });
        scope.enter(state, Phase::Planning, payload)?;
        let plan = match scope.guard(self.plan(state.request(), state.context())).await? {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::error!(error = %reason, "Planning failed");
                state.fail(reason);
                return Ok(());
            }
        };
        state.set_plan(plan.clone());

        scope.enter(
            state,
            Phase::Specialists,
            json!({ "steps": plan.steps.len(), "roles": plan.roles() }),
        )?;
        let results = scope
            .guard(self.dispatch(&plan, state.request(), state.context()))
            .await?;
        state.set_specialist_results(results.clone());

        scope.enter(state, Phase::Aggregating, json!({ "results": results.len() }))?;
        let composite = match self.aggregator.aggregate(&results) {
            Some(composite) => composite,
            None => {
                state.fail("no specialist results to aggregate");
                return Ok(());
            }
        };
        tracing::info!(
            decision = %composite.primary.decision_type,
            risk = composite.primary.risk_score,
            consensus = composite.consensus_score,
            path = ?composite.path,
            "Aggregated"
        );
        state.set_composite(composite.clone());

        if !self.review(state, scope, &composite).await? {
            return Ok(());
        }
        let Some(decision) = state.final_decision().cloned() else {
            return Ok(());
        };

        scope.enter(
            state,
            Phase::Resolution,
            json!({ "max_steps": options.resolution_steps }),
        )?;
        let mut resolution = Resolution::new(options.resolution_steps);
        let mut interrupted = None;
        while !resolution.is_finished() {
            if let Err(reason) = scope.checkpoint() {
                interrupted = Some(reason);
                break;
            }
            let step = resolution.advance(self.proposer.as_ref(), &decision, state.context());
            match scope.guard(step).await {
                Ok(Some(step)) => scope.emit(Phase::Resolution, json!(step)),
                Ok(None) => {}
                Err(reason) => {
                    interrupted = Some(reason);
                    break;
                }
            }
        }
        if let Some(reason) = interrupted {
            resolution.halt(format!("interrupted: {}", reason));
        }
        state.set_resolution(resolution.finish(self.stability.as_ref(), &decision));

        match interrupted {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// The constraint/judgment loop. Returns whether judgment approved.
    async fn review(
        &self,
        state: &mut RunState,
        scope: &RunScope,
        composite: &CompositeDecision,
    ) -> Result<bool, Interruption> {
        let mut feedback: Option<String> = None;
        let mut attempt = 0;

        loop {
            scope.enter(
                state,
                Phase::ConstraintCheck,
                json!({ "attempt": attempt, "feedback": feedback }),
            )?;
            let mut constraint = scope
                .guard(self.check(composite, feedback.as_deref()))
                .await?;
            constraint.retry_count = state.retry_count();
            constraint.prior_feedback = feedback.clone();

            scope.enter(
                state,
                Phase::Judgment,
                json!({ "attempt": attempt, "is_safe": constraint.is_safe }),
            )?;
            let judgment = scope.guard(self.judge(composite, &constraint)).await?;
            let approved = judgment.is_approved;
            let rejection = (!approved).then(|| judgment.feedback.clone());
            scope.emit(
                Phase::Judgment,
                json!({ "attempt": attempt, "approved": approved, "feedback": rejection }),
            );

            let retry = state.record_review(ReviewRound {
                attempt,
                constraint,
                judgment,
            });
            if approved {
                return Ok(true);
            }
            if !retry {
                tracing::warn!(attempts = attempt + 1, "Retry bound exhausted, run rejected");
                return Ok(false);
            }
            tracing::info!(attempt, feedback = ?rejection, "Judgment rejected, retrying");
            feedback = rejection;
            attempt += 1;
        }
    }

    async fn plan(&self, request: &str, context: &Context) -> Result<Plan, String> {
        let draft = self
            .planner
            .plan(request, context)
            .await
            .map_err(|e| format!("planner failed: {}", e))?;
        draft
            .resolve(|role| self.evaluators.contains_key(&role))
            .map_err(|e| format!("invalid plan: {}", e))
    }

    /// Fan out one evaluation per step and wait for all of them.
    async fn dispatch(&self, plan: &Plan, request: &str, context: &Context) -> Vec<SpecialistResult> {
        join_all(
            plan.steps
                .iter()
                .map(|step| self.evaluate_step(step, request, context)),
        )
        .await
    }

    async fn evaluate_step(&self, step: &PlanStep, request: &str, context: &Context) -> SpecialistResult {
        let instruction = if step.objective.trim().is_empty() {
            request.to_string()
        } else {
            format!("{}\n\nObjective: {}", request, step.objective)
        };

        let reply = match self.evaluators.get(&step.role) {
            Some(evaluator) => evaluator.evaluate(step.role, &instruction, context).await,
            None => Err(concord_core::Fault::system(format!(
                "no evaluator registered for {}",
                step.role
            ))),
        };

        let result = interpret_reply(step.role, &step.id, reply);
        if let Some(fault) = result.fault() {
            tracing::warn!(role = %step.role, step = %step.id, error = %fault, "Specialist faulted");
        }
        result
    }

    /// Constraint check; a failing checker yields an unsafe result.
    async fn check(&self, composite: &CompositeDecision, feedback: Option<&str>) -> ConstraintResult {
        match self.constraint.check(composite, feedback).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Constraint check failed, treating as unsafe");
                ConstraintResult::unavailable(e)
            }
        }
    }

    /// Judgment; a failing or malformed judgment counts as a rejection.
    async fn judge(&self, composite: &CompositeDecision, constraint: &ConstraintResult) -> JudgmentResult {
        match self.judgment.judge(composite, constraint).await {
            Ok(judgment) => match judgment.validate() {
                Ok(()) => judgment,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed judgment, treating as rejection");
                    JudgmentResult::unavailable(format!("invalid judgment: {}", e))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Judgment failed, treating as rejection");
                JudgmentResult::unavailable(e)
            }
        }
    }
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    planner: Option<Arc<dyn Planner>>,
    evaluators: BTreeMap<Role, Arc<dyn Evaluator>>,
    constraint: Option<Arc<dyn ConstraintChecker>>,
    judgment: Option<Arc<dyn JudgmentArbiter>>,
    proposer: Option<Arc<dyn StepProposer>>,
    stability: Arc<dyn StabilityPolicy>,
    archive: Option<Arc<dyn ReportArchive>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            planner: None,
            evaluators: BTreeMap::new(),
            constraint: None,
            judgment: None,
            proposer: None,
            stability: Arc::new(FixedStability::default()),
            archive: None,
        }
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Register the evaluator for a role. A later registration replaces it.
    pub fn evaluator(mut self, role: Role, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.insert(role, evaluator);
        self
    }

    pub fn constraint_checker(mut self, checker: Arc<dyn ConstraintChecker>) -> Self {
        self.constraint = Some(checker);
        self
    }

    pub fn judgment_arbiter(mut self, arbiter: Arc<dyn JudgmentArbiter>) -> Self {
        self.judgment = Some(arbiter);
        self
    }

    pub fn step_proposer(mut self, proposer: Arc<dyn StepProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    pub fn stability_policy(mut self, policy: Arc<dyn StabilityPolicy>) -> Self {
        self.stability = policy;
        self
    }

    pub fn archive(mut self, archive: Arc<dyn ReportArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn build(self) -> Result<Coordinator, CoordinatorError> {
        if self.evaluators.is_empty() {
            return Err(CoordinatorError::NoEvaluators);
        }
        Ok(Coordinator {
            planner: self.planner.ok_or(CoordinatorError::NotConfigured("planner"))?,
            evaluators: self.evaluators,
            constraint: self
                .constraint
                .ok_or(CoordinatorError::NotConfigured("constraint checker"))?,
            judgment: self
                .judgment
                .ok_or(CoordinatorError::NotConfigured("judgment arbiter"))?,
            proposer: self
                .proposer
                .ok_or(CoordinatorError::NotConfigured("step proposer"))?,
            stability: self.stability,
            archive: self.archive,
            aggregator: Aggregator::new(),
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
