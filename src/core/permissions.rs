//! Static role → permission table checked by every handler.

use crate::models::user::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadPatients,
    WritePatients,
    ManageUsers,
    ManageAppointments,
    OrderLabs,
    EnterLabResults,
    Prescribe,
    DispenseMedication,
    UploadDocuments,
    RequestConsent,
    RespondConsent,
    ManageConsent,
    ViewAuditLogs,
    ViewCompliance,
    ViewInsights,
    GenerateInsights,
    ViewSystem,
    ManageSettings,
    ViewDashboard,
    SendNotifications,
}

impl Permission {
    pub fn name(&self) -> &'static str {
        match self {
            Permission::ReadPatients => "patients:read",
            Permission::WritePatients => "patients:write",
            Permission::ManageUsers => "users:manage",
            Permission::ManageAppointments => "appointments:manage",
            Permission::OrderLabs => "labs:order",
            Permission::EnterLabResults => "labs:result",
            Permission::Prescribe => "prescriptions:write",
            Permission::DispenseMedication => "prescriptions:dispense",
            Permission::UploadDocuments => "documents:write",
            Permission::RequestConsent => "consent:request",
            Permission::RespondConsent => "consent:respond",
            Permission::ManageConsent => "consent:manage",
            Permission::ViewAuditLogs => "audit:read",
            Permission::ViewCompliance => "compliance:read",
            Permission::ViewInsights => "insights:read",
            Permission::GenerateInsights => "insights:generate",
            Permission::ViewSystem => "system:read",
            Permission::ManageSettings => "settings:write",
            Permission::ViewDashboard => "dashboard:read",
            Permission::SendNotifications => "notifications:send",
        }
    }
}

pub fn role_has(role: Role, permission: Permission) -> bool {
    use Permission::*;

    match role {
        Role::Admin => true,
        Role::Doctor => matches!(
            permission,
            ReadPatients
                | WritePatients
                | ManageAppointments
                | OrderLabs
                | Prescribe
                | UploadDocuments
                | ViewInsights
                | GenerateInsights
                | ViewDashboard
        ),
        Role::Nurse => matches!(
            permission,
            ReadPatients | WritePatients | ManageAppointments | UploadDocuments | ViewInsights | ViewDashboard
        ),
        Role::LabTechnician => matches!(permission, ReadPatients | EnterLabResults | ViewDashboard),
        Role::Pharmacist => matches!(permission, ReadPatients | DispenseMedication | ViewDashboard),
        Role::Staff => matches!(
            permission,
            ReadPatients | WritePatients | ManageAppointments | UploadDocuments | ViewDashboard
        ),
        Role::Patient => matches!(permission, RespondConsent),
        Role::ExternalUser => matches!(permission, RequestConsent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn admin_holds_everything() {
        for p in [
            Permission::ManageUsers,
            Permission::ViewSystem,
            Permission::ManageSettings,
            Permission::ManageConsent,
            Permission::RequestConsent,
        ] {
            assert!(role_has(Role::Admin, p), "admin lacks {}", p.name());
        }
    }

    #[test_case(Role::Doctor, Permission::Prescribe, true)]
    #[test_case(Role::Nurse, Permission::Prescribe, false)]
    #[test_case(Role::Pharmacist, Permission::DispenseMedication, true)]
    #[test_case(Role::Doctor, Permission::DispenseMedication, false)]
    #[test_case(Role::LabTechnician, Permission::EnterLabResults, true)]
    #[test_case(Role::Doctor, Permission::ViewAuditLogs, false)]
    #[test_case(Role::Patient, Permission::ReadPatients, false)]
    #[test_case(Role::Patient, Permission::RespondConsent, true)]
    #[test_case(Role::ExternalUser, Permission::RequestConsent, true)]
    #[test_case(Role::ExternalUser, Permission::ReadPatients, false)]
    fn role_table(role: Role, permission: Permission, allowed: bool) {
        assert_eq!(role_has(role, permission), allowed);
    }
}
