//! The approval state machine, as pure planning functions.
//!
//! Each scope (one stage, or a whole flat workflow) moves through
//! `no tasks yet -> tasks open -> resolved`. The [`Planner`] never touches
//! storage: it reads a snapshot of the submission's tasks and returns a
//! [`Transition`] describing which tasks to create, which pending tasks to
//! skip, and whether the submission is now resolved. The engine applies the
//! transition inside the submission's transaction.

use crate::approval::{ApprovalLogic, SubmissionStatus, TaskKind, TaskStatus};
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};
use crate::workflow::{GroupRef, Scope, WorkflowDefinition};

/// The facts about one existing task that planning depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: DbId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub assigned_group: Option<DbId>,
    pub stage_number: Option<i32>,
    pub step_number: Option<i32>,
}

/// A task the transition wants created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub kind: TaskKind,
    /// Set for manager tasks.
    pub assigned_to: Option<DbId>,
    /// Set for group tasks.
    pub assigned_group: Option<GroupRef>,
    pub stage_id: Option<DbId>,
    pub stage_number: Option<i32>,
    /// Position within a sequential chain, 1-based.
    pub step_number: Option<i32>,
    pub step_name: String,
    pub due_date: Option<Timestamp>,
}

/// Final verdict on a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Rejected,
}

impl Outcome {
    pub fn submission_status(self) -> SubmissionStatus {
        match self {
            Outcome::Approved => SubmissionStatus::Approved,
            Outcome::Rejected => SubmissionStatus::Rejected,
        }
    }
}

/// What one planning step wants done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub create: Vec<NewTask>,
    /// Pending tasks to move to `skipped`.
    pub skip: Vec<DbId>,
    /// Set when the submission resolves.
    pub outcome: Option<Outcome>,
    /// Stage numbers (`None` for flat) whose manager gate was bypassed
    /// because the submitter has no resolvable manager.
    pub bypassed_manager_gates: Vec<Option<i32>>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.skip.is_empty() && self.outcome.is_none()
    }

    fn skip_pending<'t>(&mut self, tasks: impl IntoIterator<Item = &'t TaskSnapshot>) {
        for task in tasks {
            if task.status == TaskStatus::Pending && !self.skip.contains(&task.id) {
                self.skip.push(task.id);
            }
        }
    }
}

/// Plans transitions for one submission of one workflow.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    workflow: &'a WorkflowDefinition,
    /// The submitter's manager, if the directory knows one.
    manager: Option<DbId>,
    now: Timestamp,
}

impl<'a> Planner<'a> {
    pub fn new(workflow: &'a WorkflowDefinition, manager: Option<DbId>, now: Timestamp) -> Self {
        Self {
            workflow,
            manager,
            now,
        }
    }

    /// Open the first scope of a freshly submitted form.
    ///
    /// Workflows that need no approval, and first scopes with nobody to ask,
    /// resolve as approved straight away.
    pub fn on_submission(&self) -> Transition {
        let mut t = Transition::default();
        if !self.workflow.requires_approval {
            self.finalize(&[], Outcome::Approved, &mut t);
            return t;
        }
        self.open_scope(self.workflow.first_scope(), &[], &mut t);
        t
    }

    /// React to a decision on task `decided_id`.
    ///
    /// `tasks` is every task of the submission *after* the decision has
    /// been written, so the decided task is already approved or rejected.
    pub fn on_decision(&self, tasks: &[TaskSnapshot], decided_id: DbId) -> Result<Transition, CoreError> {
        let decided = tasks
            .iter()
            .find(|t| t.id == decided_id)
            .ok_or(CoreError::NotFound {
                entity: "approval task",
                id: decided_id,
            })?;

        let scope = self.workflow.scope(decided.stage_number).ok_or_else(|| {
            CoreError::Conflict(format!(
                "Task {} does not belong to any scope of workflow {}",
                decided.id, self.workflow.id
            ))
        })?;

        let mut t = Transition::default();
        match (decided.kind, decided.status) {
            (TaskKind::Manager, TaskStatus::Approved) => {
                if !self.open_group_tasks(scope, &mut t) {
                    self.scope_approved(scope, tasks, &mut t);
                }
            }
            (TaskKind::Manager, TaskStatus::Rejected) => {
                self.finalize(tasks, Outcome::Rejected, &mut t);
            }
            (TaskKind::Group, TaskStatus::Approved) => {
                self.group_approved(scope, decided, tasks, &mut t);
            }
            (TaskKind::Group, TaskStatus::Rejected) => {
                self.group_rejected(scope, decided, tasks, &mut t);
            }
            (_, status) => {
                return Err(CoreError::Validation(format!(
                    "Task {} is '{status}', not a decision",
                    decided.id
                )));
            }
        }
        Ok(t)
    }

    /// Resolve the submission regardless of open tasks (auto-approval).
    pub fn force(&self, tasks: &[TaskSnapshot], outcome: Outcome) -> Transition {
        let mut t = Transition::default();
        self.finalize(tasks, outcome, &mut t);
        t
    }

    fn group_approved(&self, scope: Scope<'_>, decided: &TaskSnapshot, tasks: &[TaskSnapshot], t: &mut Transition) {
        let pending: Vec<&TaskSnapshot> = group_tasks_in(tasks, scope)
            .filter(|task| task.status == TaskStatus::Pending)
            .collect();

        match scope.rules.logic {
            ApprovalLogic::Any => {
                t.skip_pending(pending);
                self.scope_approved(scope, tasks, t);
            }
            ApprovalLogic::All => {
                if pending.is_empty() {
                    self.scope_approved(scope, tasks, t);
                }
            }
            ApprovalLogic::Sequence => {
                let position = decided
                    .assigned_group
                    .and_then(|g| scope.rules.group_position(g));
                match position {
                    Some(idx) if idx + 1 < scope.rules.groups.len() => {
                        t.create.push(self.sequence_task(scope, idx + 1));
                    }
                    Some(_) => self.scope_approved(scope, tasks, t),
                    // The group was removed from the chain after the task opened.
                    None => {
                        if pending.is_empty() {
                            self.scope_approved(scope, tasks, t);
                        }
                    }
                }
            }
        }
    }

    fn group_rejected(&self, scope: Scope<'_>, decided: &TaskSnapshot, tasks: &[TaskSnapshot], t: &mut Transition) {
        match scope.rules.logic {
            ApprovalLogic::All | ApprovalLogic::Sequence => {
                self.finalize(tasks, Outcome::Rejected, t);
            }
            ApprovalLogic::Any => {
                // Only unanimous rejection vetoes an `any` scope.
                let mut others = group_tasks_in(tasks, scope).filter(|task| task.id != decided.id);
                let still_open = others.any(|task| {
                    matches!(task.status, TaskStatus::Pending | TaskStatus::Approved)
                });
                if !still_open {
                    self.finalize(tasks, Outcome::Rejected, t);
                }
            }
        }
    }

    fn scope_approved(&self, scope: Scope<'_>, tasks: &[TaskSnapshot], t: &mut Transition) {
        match self.workflow.next_scope(scope.stage_number) {
            Some(next) => self.open_scope(next, tasks, t),
            None => self.finalize(tasks, Outcome::Approved, t),
        }
    }

    fn open_scope(&self, scope: Scope<'_>, tasks: &[TaskSnapshot], t: &mut Transition) {
        if scope.rules.requires_manager_approval {
            match self.manager {
                Some(manager) => {
                    t.create.push(self.manager_task(scope, manager));
                    return;
                }
                None => t.bypassed_manager_gates.push(scope.stage_number),
            }
        }
        if !self.open_group_tasks(scope, t) {
            // Nobody to ask: the scope approves by omission.
            self.finalize(tasks, Outcome::Approved, t);
        }
    }

    /// Queue the group tasks of `scope`. Returns false when it has no groups.
    fn open_group_tasks(&self, scope: Scope<'_>, t: &mut Transition) -> bool {
        let groups = &scope.rules.groups;
        if groups.is_empty() {
            return false;
        }
        match scope.rules.logic {
            ApprovalLogic::Sequence => t.create.push(self.sequence_task(scope, 0)),
            ApprovalLogic::All | ApprovalLogic::Any => {
                for group in groups {
                    let name = step_name(scope, &format!("{} Approval", group.name));
                    t.create.push(self.group_task(scope, group, None, name));
                }
            }
        }
        true
    }

    fn finalize(&self, tasks: &[TaskSnapshot], outcome: Outcome, t: &mut Transition) {
        t.create.clear();
        t.skip_pending(tasks);
        t.outcome = Some(outcome);
    }

    fn manager_task(&self, scope: Scope<'_>, manager: DbId) -> NewTask {
        NewTask {
            kind: TaskKind::Manager,
            assigned_to: Some(manager),
            assigned_group: None,
            stage_id: scope.stage.map(|s| s.id),
            stage_number: scope.stage_number,
            step_number: None,
            step_name: step_name(scope, "Manager Approval"),
            due_date: self.workflow.deadlines.due_date(self.now),
        }
    }

    /// The task for the group at zero-based `idx` of a sequential chain.
    fn sequence_task(&self, scope: Scope<'_>, idx: usize) -> NewTask {
        let group = &scope.rules.groups[idx];
        let step = idx as i32 + 1;
        let label = format!(
            "{} Approval (Step {step} of {})",
            group.name,
            scope.rules.groups.len()
        );
        self.group_task(scope, group, Some(step), step_name(scope, &label))
    }

    fn group_task(&self, scope: Scope<'_>, group: &GroupRef, step_number: Option<i32>, step_name: String) -> NewTask {
        NewTask {
            kind: TaskKind::Group,
            assigned_to: None,
            assigned_group: Some(group.clone()),
            stage_id: scope.stage.map(|s| s.id),
            stage_number: scope.stage_number,
            step_number,
            step_name,
            due_date: self.workflow.deadlines.due_date(self.now),
        }
    }
}

fn group_tasks_in<'t>(tasks: &'t [TaskSnapshot], scope: Scope<'_>) -> impl Iterator<Item = &'t TaskSnapshot> {
    let stage_number = scope.stage_number;
    tasks
        .iter()
        .filter(move |t| t.kind == TaskKind::Group && t.stage_number == stage_number)
}

fn step_name(scope: Scope<'_>, label: &str) -> String {
    match scope.stage_number {
        Some(n) => format!("Stage {n}: {label}"),
        None => label.to_string(),
    }
}

/// Check that a task can still take a decision.
pub fn ensure_decidable(submission: SubmissionStatus, task: TaskStatus) -> Result<(), CoreError> {
    if task != TaskStatus::Pending {
        return Err(CoreError::Conflict(format!(
            "Task has already been {task}"
        )));
    }
    if submission != SubmissionStatus::PendingApproval {
        return Err(CoreError::Conflict(format!(
            "Submission is '{submission}', not awaiting approval"
        )));
    }
    Ok(())
}

/// Validate a withdrawal and return the pending tasks it cancels.
pub fn plan_withdrawal(
    status: SubmissionStatus,
    submitted_by: Option<DbId>,
    acting_user: DbId,
    tasks: &[TaskSnapshot],
) -> Result<Vec<DbId>, CoreError> {
    if submitted_by != Some(acting_user) {
        return Err(CoreError::Forbidden(
            "Only the submitter can withdraw a submission".to_string(),
        ));
    }
    if !matches!(
        status,
        SubmissionStatus::Submitted | SubmissionStatus::PendingApproval
    ) {
        return Err(CoreError::Conflict(format!(
            "A '{status}' submission cannot be withdrawn"
        )));
    }
    Ok(tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| t.id)
        .collect())
}
