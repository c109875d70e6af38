//! HR entity catalog and typed views of the records screens read most.

use serde::{Deserialize, Serialize};

use crate::client::UpdateMethod;
use crate::entity::Entity;

macro_rules! entity {
    ($(#[$doc:meta])* $ty:ident, $name:literal, $path:literal, $event:literal, $page:expr, $update:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $ty;

        impl Entity for $ty {
            const NAME: &'static str = $name;
            const PATH: &'static str = $path;
            const CHANGE_EVENT: &'static str = $event;
            const DEFAULT_PAGE_SIZE: u32 = $page;
            const UPDATE_METHOD: UpdateMethod = $update;
        }
    };
}

entity!(
    /// Employee master data.
    Employee, "Employee", "employees", "EmployeeChanged", 10, UpdateMethod::Put
);
entity!(
    /// Employment contracts.
    Contract, "Contract", "contracts", "ContractChanged", 10, UpdateMethod::Put
);
entity!(
    /// Overtime requests and approvals.
    Overtime, "Overtime", "overtime", "OvertimeChanged", 10, UpdateMethod::Patch
);
entity!(
    /// In-app notifications.
    Notification, "Notification", "notifications", "NotificationChanged", 20, UpdateMethod::Patch
);
entity!(
    /// Reusable shift definitions.
    ShiftTemplate, "ShiftTemplate", "shift-templates", "ShiftTemplateChanged", 50, UpdateMethod::Put
);
entity!(
    /// Per-employee work schedule entries. Listed in bulk for calendar views.
    WorkSchedule, "WorkSchedule", "work-schedules", "WorkScheduleChanged", 500, UpdateMethod::Put
);
entity!(
    /// Reward and disciplinary records.
    RewardPenalty, "RewardPenalty", "reward-penalties", "RewardPenaltyChanged", 10, UpdateMethod::Put
);
entity!(
    /// Payroll runs and payslips.
    Payroll, "Payroll", "payrolls", "PayrollChanged", 10, UpdateMethod::Put
);
entity!(
    /// Training courses and enrolments.
    Training, "Training", "trainings", "TrainingChanged", 10, UpdateMethod::Put
);

/// Typed view of an employee record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default)]
    pub position_name: Option<String>,
    #[serde(default)]
    pub status: Option<i32>,
}

/// Typed view of a contract record.
///
/// `employee_full_name` is denormalized by the server; it is not kept in
/// sync with the employee store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractView {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub employee_id: String,
    #[serde(default)]
    pub employee_full_name: Option<String>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Typed view of a work schedule entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkScheduleView {
    pub id: String,
    pub employee_id: String,
    #[serde(default)]
    pub employee_full_name: Option<String>,
    #[serde(default)]
    pub shift_template_id: Option<String>,
    pub work_date: String,
}

/// Typed view of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    #[test]
    fn catalog_constants() {
        assert_eq!(Contract::PATH, "contracts");
        assert_eq!(Contract::CHANGE_EVENT, "ContractChanged");
        assert_eq!(WorkSchedule::DEFAULT_PAGE_SIZE, 500);
        assert_eq!(Overtime::UPDATE_METHOD, UpdateMethod::Patch);
    }

    #[test]
    fn page_sizes_are_in_range() {
        for size in [
            Employee::DEFAULT_PAGE_SIZE,
            Contract::DEFAULT_PAGE_SIZE,
            Overtime::DEFAULT_PAGE_SIZE,
            Notification::DEFAULT_PAGE_SIZE,
            ShiftTemplate::DEFAULT_PAGE_SIZE,
            WorkSchedule::DEFAULT_PAGE_SIZE,
            RewardPenalty::DEFAULT_PAGE_SIZE,
            Payroll::DEFAULT_PAGE_SIZE,
            Training::DEFAULT_PAGE_SIZE,
        ] {
            assert!((10..=500).contains(&size));
        }
    }

    #[test]
    fn contract_view_from_record() {
        let record = Record::from_value(json!({
            "id": "c1",
            "employeeId": "e7",
            "employeeFullName": "Lan Pham",
            "status": 1,
            "salary": 1200
        }))
        .unwrap();
        let view: ContractView = record.to_typed().unwrap();
        assert_eq!(view.employee_id, "e7");
        assert_eq!(view.employee_full_name.as_deref(), Some("Lan Pham"));
        assert_eq!(view.title, None);
    }

    #[test]
    fn notification_view_defaults_unread() {
        let record = Record::from_value(json!({"id": 3, "message": "hi"})).unwrap();
        let view: NotificationView = record.to_typed().unwrap();
        assert_eq!(view.id, "3");
        assert!(!view.is_read);
    }
}
