//! Workflow definitions as the orchestrator consumes them.
//!
//! A definition is read-only input: it is authored elsewhere, loaded once
//! per operation, and never mutated here. A workflow with at least one stage
//! runs in *staged mode*; otherwise its own flat rules form the single scope.

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalLogic;
use crate::cadence::CadencePolicy;
use crate::deadlines::DeadlinePolicy;
use crate::error::CoreError;
use crate::types::DbId;

/// A reference to an approval group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: DbId,
    pub name: String,
}

impl GroupRef {
    pub fn new(id: DbId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Approval rules for one scope (a stage, or a whole flat workflow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRules {
    pub logic: ApprovalLogic,
    /// Approver groups in declared order.
    pub groups: Vec<GroupRef>,
    pub requires_manager_approval: bool,
}

impl ScopeRules {
    pub fn new(logic: ApprovalLogic, groups: Vec<GroupRef>) -> Self {
        Self {
            logic,
            groups,
            requires_manager_approval: false,
        }
    }

    pub fn with_manager_gate(mut self) -> Self {
        self.requires_manager_approval = true;
        self
    }

    /// Zero-based position of `group_id` in declared order.
    pub fn group_position(&self, group_id: DbId) -> Option<usize> {
        self.groups.iter().position(|g| g.id == group_id)
    }
}

/// One ordered phase of a staged workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: DbId,
    /// Authoring order; unique per workflow.
    pub order: i32,
    pub name: String,
    pub rules: ScopeRules,
}

/// Which notifications a workflow sends and to whom besides the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub notify_on_submission: bool,
    pub notify_on_approval: bool,
    pub notify_on_rejection: bool,
    pub additional_emails: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            notify_on_submission: true,
            notify_on_approval: true,
            notify_on_rejection: true,
            additional_emails: Vec::new(),
        }
    }
}

/// Split the comma-separated `additional_notify_emails` column.
pub fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

/// The complete approval configuration for one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: DbId,
    pub form_id: DbId,
    pub form_name: String,
    pub requires_approval: bool,
    /// Legacy flat-mode rules. Ignored once any stage exists.
    pub flat: ScopeRules,
    /// Stages sorted by `order`; stage number N is `stages[N - 1]`.
    pub stages: Vec<WorkflowStage>,
    pub escalation_groups: Vec<GroupRef>,
    pub deadlines: DeadlinePolicy,
    pub cadence: CadencePolicy,
    pub notifications: NotificationSettings,
}

/// A scope resolved against a definition.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// `None` in flat mode.
    pub stage: Option<&'a WorkflowStage>,
    /// 1-based stage number, `None` in flat mode.
    pub stage_number: Option<i32>,
    pub rules: &'a ScopeRules,
}

impl WorkflowDefinition {
    /// A flat workflow with immediate notifications and no timeouts.
    pub fn flat(id: DbId, form_id: DbId, form_name: impl Into<String>, rules: ScopeRules) -> Self {
        Self {
            id,
            form_id,
            form_name: form_name.into(),
            requires_approval: true,
            flat: rules,
            stages: Vec::new(),
            escalation_groups: Vec::new(),
            deadlines: DeadlinePolicy::default(),
            cadence: CadencePolicy::immediate(),
            notifications: NotificationSettings::default(),
        }
    }

    /// Switch to staged mode. Stages are sorted by `order`.
    pub fn with_stages(mut self, mut stages: Vec<WorkflowStage>) -> Self {
        stages.sort_by_key(|s| s.order);
        self.stages = stages;
        self
    }

    /// Check invariants that authoring should already guarantee.
    pub fn validate(&self) -> Result<(), CoreError> {
        for pair in self.stages.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(CoreError::Validation(format!(
                    "Workflow {} has two stages with order {}",
                    self.id, pair[0].order
                )));
            }
        }
        Ok(())
    }

    pub fn is_staged(&self) -> bool {
        !self.stages.is_empty()
    }

    /// The scope a workflow opens with: stage 1, or the flat scope.
    pub fn first_scope(&self) -> Scope<'_> {
        if self.is_staged() {
            // Non-empty, checked above.
            self.scope(Some(1)).unwrap_or(Scope {
                stage: None,
                stage_number: None,
                rules: &self.flat,
            })
        } else {
            Scope {
                stage: None,
                stage_number: None,
                rules: &self.flat,
            }
        }
    }

    /// Look up a scope by stage number (`None` for flat mode).
    ///
    /// Returns `None` when the number does not match the workflow's mode.
    pub fn scope(&self, stage_number: Option<i32>) -> Option<Scope<'_>> {
        match (self.is_staged(), stage_number) {
            (false, None) => Some(Scope {
                stage: None,
                stage_number: None,
                rules: &self.flat,
            }),
            (true, Some(n)) if n >= 1 => {
                let stage = self.stages.get((n - 1) as usize)?;
                Some(Scope {
                    stage: Some(stage),
                    stage_number: Some(n),
                    rules: &stage.rules,
                })
            }
            _ => None,
        }
    }

    /// The scope following `stage_number`, if any. Flat workflows have none.
    pub fn next_scope(&self, stage_number: Option<i32>) -> Option<Scope<'_>> {
        stage_number.and_then(|n| self.scope(Some(n + 1)))
    }

    /// Whether any scope this workflow can reach has a manager gate.
    pub fn needs_manager(&self) -> bool {
        if self.is_staged() {
            self.stages.iter().any(|s| s.rules.requires_manager_approval)
        } else {
            self.flat.requires_manager_approval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: DbId, order: i32, logic: ApprovalLogic) -> WorkflowStage {
        WorkflowStage {
            id,
            order,
            name: format!("Stage {order}"),
            rules: ScopeRules::new(logic, vec![GroupRef::new(id * 10, "G")]),
        }
    }

    fn base() -> WorkflowDefinition {
        WorkflowDefinition::flat(1, 1, "Travel", ScopeRules::new(ApprovalLogic::All, vec![]))
    }

    #[test]
    fn stages_sorted_by_order() {
        let wf = base().with_stages(vec![
            stage(2, 20, ApprovalLogic::Any),
            stage(1, 10, ApprovalLogic::All),
        ]);
        assert_eq!(wf.stages[0].id, 1);
        assert_eq!(wf.scope(Some(2)).unwrap().stage.unwrap().id, 2);
    }

    #[test]
    fn duplicate_stage_order_is_invalid() {
        let wf = base().with_stages(vec![
            stage(1, 10, ApprovalLogic::All),
            stage(2, 10, ApprovalLogic::Any),
        ]);
        assert!(wf.validate().is_err());
    }

    #[test]
    fn flat_scope_only_without_stage_number() {
        let wf = base();
        assert!(wf.scope(None).is_some());
        assert!(wf.scope(Some(1)).is_none());
        assert!(wf.next_scope(None).is_none());
    }

    #[test]
    fn staged_scope_requires_stage_number() {
        let wf = base().with_stages(vec![stage(1, 1, ApprovalLogic::All)]);
        assert!(wf.scope(None).is_none());
        assert!(wf.scope(Some(0)).is_none());
        assert!(wf.scope(Some(2)).is_none());
        assert_eq!(wf.first_scope().stage_number, Some(1));
    }

    #[test]
    fn next_scope_walks_stages() {
        let wf = base().with_stages(vec![
            stage(1, 1, ApprovalLogic::All),
            stage(2, 2, ApprovalLogic::Any),
        ]);
        assert_eq!(wf.next_scope(Some(1)).unwrap().stage_number, Some(2));
        assert!(wf.next_scope(Some(2)).is_none());
    }

    #[test]
    fn needs_manager_follows_mode() {
        let mut wf = base();
        wf.flat.requires_manager_approval = true;
        assert!(wf.needs_manager());

        // Flat rules are ignored once stages exist.
        let wf = wf.with_stages(vec![stage(1, 1, ApprovalLogic::All)]);
        assert!(!wf.needs_manager());
    }

    #[test]
    fn email_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_email_list(" a@x.org, ,b@x.org,"),
            vec!["a@x.org".to_string(), "b@x.org".to_string()]
        );
        assert!(parse_email_list("").is_empty());
    }
}
