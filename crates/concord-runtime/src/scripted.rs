//! Scripted collaborators built from a [`Scenario`].
//!
//! Every collaborator answers from the scenario's sequences in order; once a
//! sequence is exhausted its last entry repeats. This lets a whole run be
//! replayed offline and doubles as a test fixture.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use concord_core::{
    CompositeDecision, ConstraintResult, Context, Decision, Fault, JudgmentResult, PlanDraft,
    ResolutionStep, Role, Scenario, ScenarioError, Scripted, ScriptedReply,
};

use crate::collaborators::{
    CollaboratorError, ConstraintChecker, Evaluator, FixedStability, JudgmentArbiter, Planner,
    StepProposer,
};
use crate::coordinator::CoordinatorBuilder;

/// Ordered answers; the last one repeats once the rest are used up.
#[derive(Debug)]
struct Sequence<T> {
    items: Vec<T>,
    cursor: Mutex<usize>,
}

impl<T: Clone> Sequence<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: Mutex::new(0),
        }
    }

    fn next(&self) -> Option<T> {
        let mut cursor = self.cursor.lock();
        let item = self.items.get(*cursor).or_else(|| self.items.last()).cloned();
        *cursor += 1;
        item
    }

    /// Number of answers handed out so far.
    fn calls(&self) -> usize {
        *self.cursor.lock()
    }
}

fn unpack<T>(entry: Scripted<T>) -> Result<T, CollaboratorError> {
    match entry {
        Scripted::Value(value) => Ok(value),
        Scripted::Failure { error } => Err(CollaboratorError::Unavailable(error)),
    }
}

pub struct ScriptedPlanner {
    draft: PlanDraft,
    error: Option<String>,
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _: &str, _: &Context) -> Result<PlanDraft, CollaboratorError> {
        match &self.error {
            Some(error) => Err(CollaboratorError::Unavailable(error.clone())),
            None => Ok(self.draft.clone()),
        }
    }
}

/// Replays reply scripts per role.
pub struct ScriptedEvaluator {
    scripts: BTreeMap<Role, Sequence<ScriptedReply>>,
}

impl ScriptedEvaluator {
    pub fn calls(&self, role: Role) -> usize {
        self.scripts.get(&role).map(Sequence::calls).unwrap_or(0)
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, role: Role, _: &str, _: &Context) -> Result<Value, Fault> {
        let entry = self
            .scripts
            .get(&role)
            .and_then(Sequence::next)
            .ok_or_else(|| Fault::system(format!("no script for role {}", role)))?;

        if let Some(delay) = entry.delay {
            tokio::time::sleep(delay).await;
        }
        match (entry.reply, entry.fault) {
            (_, Some(fault)) => Err(fault),
            (Some(reply), None) => Ok(reply),
            (None, None) => Err(Fault::system(format!("empty script entry for {}", role))),
        }
    }
}

/// Replays constraint results and records the feedback each check received.
pub struct ScriptedConstraintChecker {
    answers: Sequence<Scripted<ConstraintResult>>,
    feedback_log: Mutex<Vec<Option<String>>>,
}

impl ScriptedConstraintChecker {
    /// Feedback passed to each check, in call order.
    pub fn feedback_log(&self) -> Vec<Option<String>> {
        self.feedback_log.lock().clone()
    }
}

#[async_trait]
impl ConstraintChecker for ScriptedConstraintChecker {
    async fn check(
        &self,
        _: &CompositeDecision,
        feedback: Option<&str>,
    ) -> Result<ConstraintResult, CollaboratorError> {
        self.feedback_log.lock().push(feedback.map(str::to_string));
        match self.answers.next() {
            Some(entry) => unpack(entry),
            None => Ok(ConstraintResult {
                is_safe: true,
                warnings: Vec::new(),
                ethical_flags: Vec::new(),
                legal_flags: Vec::new(),
                sanitized: None,
                retry_count: 0,
                prior_feedback: None,
            }),
        }
    }
}

/// Replays judgments. With no script it approves the sanitized decision if
/// the constraint check offered one, else the composite's primary.
pub struct ScriptedArbiter {
    answers: Sequence<Scripted<JudgmentResult>>,
}

impl ScriptedArbiter {
    pub fn calls(&self) -> usize {
        self.answers.calls()
    }
}

#[async_trait]
impl JudgmentArbiter for ScriptedArbiter {
    async fn judge(
        &self,
        decision: &CompositeDecision,
        constraint: &ConstraintResult,
    ) -> Result<JudgmentResult, CollaboratorError> {
        match self.answers.next() {
            Some(entry) => unpack(entry),
            None => Ok(JudgmentResult {
                is_approved: true,
                feedback: String::new(),
                final_decision: Some(
                    constraint
                        .sanitized
                        .clone()
                        .unwrap_or_else(|| decision.primary.clone()),
                ),
            }),
        }
    }
}

pub struct ScriptedProposer {
    steps: Sequence<Value>,
}

#[async_trait]
impl StepProposer for ScriptedProposer {
    async fn propose_step(
        &self,
        _: &Decision,
        _: &[ResolutionStep],
        _: &Context,
    ) -> Result<Value, CollaboratorError> {
        self.steps
            .next()
            .ok_or_else(|| CollaboratorError::Unavailable("no scripted resolution steps".into()))
    }
}

/// The full set of scripted collaborators for one scenario.
pub struct ScriptedCollaborators {
    pub planner: Arc<ScriptedPlanner>,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub constraint: Arc<ScriptedConstraintChecker>,
    pub judgment: Arc<ScriptedArbiter>,
    pub proposer: Arc<ScriptedProposer>,
    pub stability: Arc<FixedStability>,
}

impl ScriptedCollaborators {
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, ScenarioError> {
        let scripts = scenario
            .specialist_scripts()?
            .into_iter()
            .map(|(role, replies)| (role, Sequence::new(replies)))
            .collect();

        Ok(Self {
            planner: Arc::new(ScriptedPlanner {
                draft: scenario.plan.clone(),
                error: scenario.plan_error.clone(),
            }),
            evaluator: Arc::new(ScriptedEvaluator { scripts }),
            constraint: Arc::new(ScriptedConstraintChecker {
                answers: Sequence::new(scenario.constraint.clone()),
                feedback_log: Mutex::new(Vec::new()),
            }),
            judgment: Arc::new(ScriptedArbiter {
                answers: Sequence::new(scenario.judgment.clone()),
            }),
            proposer: Arc::new(ScriptedProposer {
                steps: Sequence::new(scenario.resolution.steps.clone()),
            }),
            stability: Arc::new(FixedStability(scenario.resolution.stability_score)),
        })
    }

    /// Roles the scenario scripts an evaluator for.
    pub fn roles(&self) -> Vec<Role> {
        self.evaluator.scripts.keys().copied().collect()
    }

    /// A coordinator builder with every collaborator wired in.
    ///
    /// `wrap` may decorate the evaluator (envelope, cache) before it is
    /// registered for each scripted role.
    pub fn builder_with(
        &self,
        wrap: impl Fn(Arc<dyn Evaluator>) -> Arc<dyn Evaluator>,
    ) -> CoordinatorBuilder {
        let evaluator = wrap(self.evaluator.clone());
        let mut builder = CoordinatorBuilder::new()
            .planner(self.planner.clone())
            .constraint_checker(self.constraint.clone())
            .judgment_arbiter(self.judgment.clone())
            .step_proposer(self.proposer.clone())
            .stability_policy(self.stability.clone());
        for role in self.roles() {
            builder = builder.evaluator(role, evaluator.clone());
        }
        builder
    }

    pub fn builder(&self) -> CoordinatorBuilder {
        self.builder_with(|evaluator| evaluator)
    }
}
