//! Who may do what to which form.
//!
//! Every privileged operation resolves to one `(Role, Action)` lookup in
//! [`PERMISSIONS`]; the matching [`Scope`] is then checked against the form
//! owner. A missing table entry means the role never performs the action.

use uuid::Uuid;

use super::error::IpcrError;
use super::types::{Caller, PerformanceForm, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateForm,
    ViewForm,
    EditContent,
    EditScores,
    Submit,
    Endorse,
    Return,
    Finalize,
    UploadEvidence,
    DeleteOthersEvidence,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateForm => "create a form",
            Self::ViewForm => "view this form",
            Self::EditContent => "edit indicators",
            Self::EditScores => "edit scores",
            Self::Submit => "submit this form",
            Self::Endorse => "endorse this form",
            Self::Return => "return this form",
            Self::Finalize => "finalize this form",
            Self::UploadEvidence => "upload evidence",
            Self::DeleteOthersEvidence => "delete another user's evidence",
        }
    }
}

/// Which forms a granted action reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Forms the caller owns.
    Own,
    /// Forms whose owner belongs to the caller's division.
    Division,
    Any,
}

pub struct Permission {
    pub role: Role,
    pub action: Action,
    pub scope: Scope,
}

const fn grant(role: Role, action: Action, scope: Scope) -> Permission {
    Permission {
        role,
        action,
        scope,
    }
}

pub const PERMISSIONS: &[Permission] = &[
    grant(Role::Employee, Action::CreateForm, Scope::Own),
    grant(Role::Employee, Action::ViewForm, Scope::Own),
    grant(Role::Employee, Action::EditContent, Scope::Own),
    grant(Role::Employee, Action::Submit, Scope::Own),
    grant(Role::Employee, Action::UploadEvidence, Scope::Own),
    grant(Role::DivisionChief, Action::ViewForm, Scope::Division),
    grant(Role::DivisionChief, Action::EditScores, Scope::Division),
    grant(Role::DivisionChief, Action::Endorse, Scope::Division),
    grant(Role::DivisionChief, Action::Return, Scope::Division),
    grant(Role::DivisionChief, Action::UploadEvidence, Scope::Division),
    grant(Role::HrManager, Action::ViewForm, Scope::Any),
    grant(Role::HrManager, Action::EditScores, Scope::Any),
    grant(Role::HrManager, Action::Endorse, Scope::Any),
    grant(Role::HrManager, Action::Return, Scope::Any),
    grant(Role::HrManager, Action::Finalize, Scope::Any),
    grant(Role::HrManager, Action::UploadEvidence, Scope::Any),
    grant(Role::HrManager, Action::DeleteOthersEvidence, Scope::Any),
    grant(Role::HeadOfOffice, Action::ViewForm, Scope::Any),
    grant(Role::HeadOfOffice, Action::EditScores, Scope::Any),
    grant(Role::HeadOfOffice, Action::Endorse, Scope::Any),
    grant(Role::HeadOfOffice, Action::Return, Scope::Any),
    grant(Role::HeadOfOffice, Action::Finalize, Scope::Any),
    grant(Role::HeadOfOffice, Action::UploadEvidence, Scope::Any),
    grant(Role::HeadOfOffice, Action::DeleteOthersEvidence, Scope::Any),
];

pub fn scope_for(role: Role, action: Action) -> Option<Scope> {
    PERMISSIONS
        .iter()
        .find(|p| p.role == role && p.action == action)
        .map(|p| p.scope)
}

/// Owner side of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormOwner {
    pub employee_id: Uuid,
    pub division_id: Option<Uuid>,
}

impl From<&PerformanceForm> for FormOwner {
    fn from(form: &PerformanceForm) -> Self {
        Self {
            employee_id: form.employee_id,
            division_id: form.division_id,
        }
    }
}

fn reaches(scope: Scope, caller: &Caller, owner: &FormOwner) -> bool {
    match scope {
        Scope::Own => caller.user_id == owner.employee_id,
        Scope::Division => match (caller.division_id, owner.division_id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        },
        Scope::Any => true,
    }
}

pub fn is_allowed(caller: &Caller, action: Action, owner: &FormOwner) -> bool {
    scope_for(caller.role, action).is_some_and(|scope| reaches(scope, caller, owner))
}

pub fn authorize(caller: &Caller, action: Action, owner: &FormOwner) -> Result<(), IpcrError> {
    match scope_for(caller.role, action) {
        None => Err(IpcrError::Forbidden(format!(
            "role {} may not {}",
            caller.role,
            action.as_str()
        ))),
        Some(scope) if !reaches(scope, caller, owner) => Err(IpcrError::Forbidden(match scope {
            Scope::Division => format!("form belongs to another division; cannot {}", action.as_str()),
            _ => format!("form belongs to another employee; cannot {}", action.as_str()),
        })),
        Some(_) => Ok(()),
    }
}

/// Role check for actions that are not tied to an existing form.
pub fn authorize_role(caller: &Caller, action: Action) -> Result<Scope, IpcrError> {
    scope_for(caller.role, action).ok_or_else(|| {
        IpcrError::Forbidden(format!("role {} may not {}", caller.role, action.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(division: Uuid) -> (Uuid, FormOwner) {
        let employee_id = Uuid::new_v4();
        (
            employee_id,
            FormOwner {
                employee_id,
                division_id: Some(division),
            },
        )
    }

    #[test]
    fn test_table_has_no_duplicate_entries() {
        for (i, a) in PERMISSIONS.iter().enumerate() {
            for b in &PERMISSIONS[i + 1..] {
                assert!(!(a.role == b.role && a.action == b.action));
            }
        }
    }

    #[test]
    fn test_only_employees_create_and_submit() {
        for role in [Role::DivisionChief, Role::HrManager, Role::HeadOfOffice] {
            assert_eq!(scope_for(role, Action::CreateForm), None);
            assert_eq!(scope_for(role, Action::Submit), None);
        }
        assert_eq!(scope_for(Role::Employee, Action::Submit), Some(Scope::Own));
    }

    #[test]
    fn test_employees_never_edit_scores_as_reviewer() {
        assert_eq!(scope_for(Role::Employee, Action::EditScores), None);
        let division = Uuid::new_v4();
        let (_, colleague_form) = owner(division);
        let employee = Caller::new(Uuid::new_v4(), Role::Employee, Some(division));
        assert!(matches!(
            authorize(&employee, Action::EditScores, &colleague_form),
            Err(IpcrError::Forbidden(_))
        ));
    }

    #[test]
    fn test_only_hr_managers_finalize() {
        assert_eq!(scope_for(Role::DivisionChief, Action::Finalize), None);
        assert_eq!(scope_for(Role::HrManager, Action::Finalize), Some(Scope::Any));
        assert_eq!(scope_for(Role::HeadOfOffice, Action::Finalize), Some(Scope::Any));
    }

    #[test]
    fn test_division_chief_is_scoped_to_own_division() {
        let division_a = Uuid::new_v4();
        let division_b = Uuid::new_v4();
        let chief = Caller::new(Uuid::new_v4(), Role::DivisionChief, Some(division_a));

        let (_, in_a) = owner(division_a);
        let (_, in_b) = owner(division_b);
        assert!(authorize(&chief, Action::Endorse, &in_a).is_ok());
        assert!(matches!(
            authorize(&chief, Action::Endorse, &in_b),
            Err(IpcrError::Forbidden(_))
        ));

        let chief_without_division = Caller::new(Uuid::new_v4(), Role::DivisionChief, None);
        assert!(!is_allowed(&chief_without_division, Action::Endorse, &in_a));
    }

    #[test]
    fn test_employee_only_reaches_own_form() {
        let division = Uuid::new_v4();
        let (employee_id, mine) = owner(division);
        let (_, theirs) = owner(division);
        let employee = Caller::new(employee_id, Role::Employee, Some(division));

        assert!(is_allowed(&employee, Action::EditContent, &mine));
        assert!(!is_allowed(&employee, Action::ViewForm, &theirs));
        assert!(!is_allowed(&employee, Action::Endorse, &mine));
    }
}
