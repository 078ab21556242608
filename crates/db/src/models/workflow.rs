//! Workflow configuration rows and their assembly into a
//! [`WorkflowDefinition`].

use chrono::NaiveTime;
use formflow_core::approval::ApprovalLogic;
use formflow_core::cadence::CadencePolicy;
use formflow_core::deadlines::DeadlinePolicy;
use formflow_core::error::CoreError;
use formflow_core::types::DbId;
use formflow_core::workflow::{
    parse_email_list, GroupRef, NotificationSettings, ScopeRules, WorkflowDefinition,
    WorkflowStage,
};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `workflows` table joined with its form's name.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkflowRow {
    pub id: DbId,
    pub form_id: DbId,
    pub form_name: String,
    pub requires_approval: bool,
    pub approval_logic: String,
    pub requires_manager_approval: bool,
    pub approval_deadline_days: Option<i32>,
    pub send_reminder_after_days: Option<i32>,
    pub auto_approve_after_days: Option<i32>,
    pub notification_cadence: String,
    pub notification_cadence_day: Option<i32>,
    pub notification_cadence_time: Option<NaiveTime>,
    pub notification_cadence_form_field: Option<String>,
    pub notify_on_submission: bool,
    pub notify_on_approval: bool,
    pub notify_on_rejection: bool,
    pub additional_notify_emails: String,
}

/// A row from the `workflow_stages` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StageRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub stage_order: i32,
    pub approval_logic: String,
    pub requires_manager_approval: bool,
}

/// A group attached to a workflow, stage or escalation list.
///
/// `owner_id` is the workflow id or stage id depending on the source table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GroupAssignment {
    pub owner_id: DbId,
    pub group_id: DbId,
    pub group_name: String,
    pub position: i32,
}

impl GroupAssignment {
    fn group_ref(&self) -> GroupRef {
        GroupRef::new(self.group_id, self.group_name.clone())
    }
}

/// Everything loaded for one workflow, before validation.
#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub workflow: WorkflowRow,
    pub groups: Vec<GroupAssignment>,
    pub stages: Vec<StageRow>,
    pub stage_groups: Vec<GroupAssignment>,
    pub escalation_groups: Vec<GroupAssignment>,
}

/// Groups owned by `owner_id`, in declared order.
fn ordered_groups(assignments: &[GroupAssignment], owner_id: DbId) -> Vec<GroupRef> {
    let mut owned: Vec<&GroupAssignment> = assignments
        .iter()
        .filter(|a| a.owner_id == owner_id)
        .collect();
    owned.sort_by_key(|a| (a.position, a.group_id));
    owned.into_iter().map(GroupAssignment::group_ref).collect()
}

impl WorkflowRecord {
    /// Parse and validate the rows into a definition the planner can use.
    pub fn into_definition(self) -> Result<WorkflowDefinition, CoreError> {
        let wf = &self.workflow;

        let flat = ScopeRules {
            logic: wf.approval_logic.parse::<ApprovalLogic>()?,
            groups: ordered_groups(&self.groups, wf.id),
            requires_manager_approval: wf.requires_manager_approval,
        };

        let stages = self
            .stages
            .iter()
            .map(|s| {
                Ok(WorkflowStage {
                    id: s.id,
                    order: s.stage_order,
                    name: s.name.clone(),
                    rules: ScopeRules {
                        logic: s.approval_logic.parse::<ApprovalLogic>()?,
                        groups: ordered_groups(&self.stage_groups, s.id),
                        requires_manager_approval: s.requires_manager_approval,
                    },
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let cadence = CadencePolicy::from_columns(
            &wf.notification_cadence,
            wf.notification_cadence_day,
            wf.notification_cadence_time,
            wf.notification_cadence_form_field.as_deref(),
        )?;

        let mut definition = WorkflowDefinition::flat(wf.id, wf.form_id, wf.form_name.clone(), flat)
            .with_stages(stages);
        definition.requires_approval = wf.requires_approval;
        definition.escalation_groups = self
            .escalation_groups
            .iter()
            .map(GroupAssignment::group_ref)
            .collect();
        definition.deadlines = DeadlinePolicy {
            deadline_days: wf.approval_deadline_days,
            reminder_after_days: wf.send_reminder_after_days,
            auto_approve_after_days: wf.auto_approve_after_days,
        };
        definition.cadence = cadence;
        definition.notifications = NotificationSettings {
            notify_on_submission: wf.notify_on_submission,
            notify_on_approval: wf.notify_on_approval,
            notify_on_rejection: wf.notify_on_rejection,
            additional_emails: parse_email_list(&wf.additional_notify_emails),
        };

        definition.validate()?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use formflow_core::cadence::Cadence;

    fn row() -> WorkflowRow {
        WorkflowRow {
            id: 1,
            form_id: 2,
            form_name: "Purchase Request".to_string(),
            requires_approval: true,
            approval_logic: "sequence".to_string(),
            requires_manager_approval: true,
            approval_deadline_days: Some(5),
            send_reminder_after_days: Some(2),
            auto_approve_after_days: None,
            notification_cadence: "weekly".to_string(),
            notification_cadence_day: Some(4),
            notification_cadence_time: NaiveTime::from_hms_opt(9, 30, 0),
            notification_cadence_form_field: None,
            notify_on_submission: true,
            notify_on_approval: false,
            notify_on_rejection: true,
            additional_notify_emails: "audit@x.org, ops@x.org".to_string(),
        }
    }

    fn assign(owner_id: DbId, group_id: DbId, name: &str, position: i32) -> GroupAssignment {
        GroupAssignment {
            owner_id,
            group_id,
            group_name: name.to_string(),
            position,
        }
    }

    fn stage(id: DbId, order: i32, logic: &str) -> StageRow {
        StageRow {
            id,
            workflow_id: 1,
            name: format!("Stage {order}"),
            stage_order: order,
            approval_logic: logic.to_string(),
            requires_manager_approval: false,
        }
    }

    #[test]
    fn flat_record_keeps_declared_group_order() {
        let record = WorkflowRecord {
            workflow: row(),
            groups: vec![assign(1, 30, "Legal", 2), assign(1, 10, "Finance", 1)],
            stages: vec![],
            stage_groups: vec![],
            escalation_groups: vec![assign(1, 99, "Directors", 0)],
        };
        let def = record.into_definition().unwrap();

        assert!(!def.is_staged());
        assert_eq!(def.flat.logic, ApprovalLogic::Sequence);
        let names: Vec<&str> = def.flat.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Finance", "Legal"]);
        assert_eq!(def.escalation_groups[0].id, 99);
        assert_eq!(def.cadence.cadence, Cadence::Weekly { weekday: 4 });
        assert_eq!(def.deadlines.deadline_days, Some(5));
        assert!(!def.notifications.notify_on_approval);
        assert_eq!(def.notifications.additional_emails.len(), 2);
    }

    #[test]
    fn stages_get_their_own_groups() {
        let record = WorkflowRecord {
            workflow: row(),
            groups: vec![],
            stages: vec![stage(21, 2, "any"), stage(20, 1, "all")],
            stage_groups: vec![
                assign(20, 10, "Finance", 0),
                assign(21, 30, "Legal", 0),
                assign(21, 40, "Compliance", 1),
            ],
            escalation_groups: vec![],
        };
        let def = record.into_definition().unwrap();

        assert!(def.is_staged());
        assert_eq!(def.stages[0].id, 20);
        assert_eq!(def.stages[0].rules.groups.len(), 1);
        assert_eq!(def.stages[1].rules.logic, ApprovalLogic::Any);
        assert_eq!(def.stages[1].rules.groups.len(), 2);
    }

    #[test]
    fn bad_logic_is_a_validation_error() {
        let mut wf = row();
        wf.approval_logic = "majority".to_string();
        let record = WorkflowRecord {
            workflow: wf,
            groups: vec![],
            stages: vec![],
            stage_groups: vec![],
            escalation_groups: vec![],
        };
        assert_matches!(record.into_definition(), Err(CoreError::Validation(_)));
    }
}
