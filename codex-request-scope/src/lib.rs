#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Ambient request scope propagation.
//!
//! Every mutating or reading call into the ledger core runs inside a
//! [`RequestScope`] bound to the current async task via [`enter`]. Callers
//! that need the scope without threading it through every function
//! signature read it back with [`current`]; callers that build repository
//! APIs should still accept `&RequestScope` explicitly (see
//! [`require_company_id`] for the common case) so enforcement does not
//! depend solely on the task-local being propagated correctly across an
//! executor boundary.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub type TenantId = String;
pub type CompanyId = String;
pub type UserId = String;

/// Distinguishes an ordinary tenant-bound call from an explicit system-scope
/// bypass. System scope must always be constructed through
/// [`RequestScope::system`] so the bypass is visible at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Tenant,
    System,
}

/// The `{requestId, userId, tenantId, companyId, roles, scopeKind}` tuple
/// bounding every read and write of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    pub request_id: Uuid,
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub company_id: Option<CompanyId>,
    pub roles: Vec<String>,
    pub kind: ScopeKind,
    /// Set only for `ScopeKind::System`; records why the bypass was taken so
    /// it can be carried into the audit event the caller is expected to
    /// append.
    pub system_reason: Option<String>,
}

impl RequestScope {
    #[must_use]
    pub fn tenant(
        user_id: UserId,
        tenant_id: TenantId,
        company_id: CompanyId,
        roles: Vec<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: Some(user_id),
            tenant_id: Some(tenant_id),
            company_id: Some(company_id),
            roles,
            kind: ScopeKind::Tenant,
            system_reason: None,
        }
    }

    /// The single named capability for a system-scope bypass (migrations,
    /// scheduled compactors). Callers that use this are expected to append
    /// an audit event recording `reason`.
    #[must_use]
    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: None,
            tenant_id: None,
            company_id: None,
            roles: Vec::new(),
            kind: ScopeKind::System,
            system_reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == ScopeKind::System
    }

    /// Returns the active company id or fails with [`ScopeError::ScopeMissing`].
    pub fn require_company_id(&self) -> Result<&CompanyId, ScopeError> {
        self.company_id.as_ref().ok_or(ScopeError::ScopeMissing)
    }

    /// Fails with [`ScopeError::CrossTenant`] if `company_id` disagrees with
    /// the active scope's company.
    pub fn assert_company_scope(&self, company_id: &str) -> Result<(), ScopeError> {
        let active = self.require_company_id()?;
        if active != company_id {
            return Err(ScopeError::CrossTenant {
                active: active.clone(),
                requested: company_id.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("no active request scope")]
    ScopeMissing,
    #[error("cross-tenant access: active company {active}, requested {requested}")]
    CrossTenant { active: CompanyId, requested: CompanyId },
    #[error("actor lacks required role {role}")]
    Unauthorized { role: String },
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Tenant => write!(f, "tenant"),
            ScopeKind::System => write!(f, "system"),
        }
    }
}

tokio::task_local! {
    static CURRENT_SCOPE: RequestScope;
}

/// Runs `fut` with `scope` observable via [`current`] for its whole
/// lifetime, including across any `.await` points inside it.
pub async fn enter<F>(scope: RequestScope, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_SCOPE.scope(scope, fut).await
}

/// Returns a clone of the innermost active scope, or `None` outside of
/// [`enter`].
#[must_use]
pub fn current() -> Option<RequestScope> {
    CURRENT_SCOPE.try_with(Clone::clone).ok()
}

/// Convenience wrapper over [`current`] +
/// [`RequestScope::require_company_id`].
pub fn require_company_id() -> Result<CompanyId, ScopeError> {
    current()
        .ok_or(ScopeError::ScopeMissing)?
        .require_company_id()
        .cloned()
}

/// Convenience wrapper over [`current`] +
/// [`RequestScope::assert_company_scope`].
pub fn assert_company_scope(company_id: &str) -> Result<(), ScopeError> {
    current()
        .ok_or(ScopeError::ScopeMissing)?
        .assert_company_scope(company_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope(company: &str) -> RequestScope {
        RequestScope::tenant(
            "user-1".into(),
            "tenant-1".into(),
            company.into(),
            vec!["admin".into()],
        )
    }

    #[tokio::test]
    async fn current_is_none_outside_enter() {
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn enter_makes_scope_observable_across_await_points() {
        let result = enter(scope("co_1"), async {
            tokio::task::yield_now().await;
            require_company_id()
        })
        .await;
        assert_eq!(result, Ok("co_1".to_string()));
    }

    #[tokio::test]
    async fn assert_company_scope_rejects_cross_tenant() {
        let result = enter(scope("co_1"), async { assert_company_scope("co_2") }).await;
        assert_eq!(
            result,
            Err(ScopeError::CrossTenant {
                active: "co_1".into(),
                requested: "co_2".into(),
            })
        );
    }

    #[tokio::test]
    async fn require_company_id_fails_closed_without_scope() {
        assert_eq!(require_company_id(), Err(ScopeError::ScopeMissing));
    }

    #[test]
    fn system_scope_records_reason_and_has_no_company() {
        let scope = RequestScope::system("nightly period compaction");
        assert!(scope.is_system());
        assert_eq!(
            scope.system_reason.as_deref(),
            Some("nightly period compaction")
        );
        assert_eq!(scope.require_company_id(), Err(ScopeError::ScopeMissing));
    }

    #[tokio::test]
    async fn nested_enter_shadows_outer_scope_for_inner_future() {
        enter(scope("co_outer"), async {
            assert_eq!(require_company_id(), Ok("co_outer".to_string()));
            enter(scope("co_inner"), async {
                assert_eq!(require_company_id(), Ok("co_inner".to_string()));
            })
            .await;
            assert_eq!(require_company_id(), Ok("co_outer".to_string()));
        })
        .await;
    }
}
