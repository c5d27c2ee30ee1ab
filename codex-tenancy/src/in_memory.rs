use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Company;
use crate::CompanyId;
use crate::CompanyStatus;
use crate::CreateCompanyRequest;
use crate::CreateFirmRequest;
use crate::Firm;
use crate::FirmId;
use crate::InviteUserRequest;
use crate::TenancyError;
use crate::TenancyResult;
use crate::TenancyService;
use crate::TenancySnapshot;
use crate::UpdateUserRolesRequest;
use crate::UserAccount;
use crate::UserId;
use crate::UserStatus;
use crate::normalize_company_name;

#[derive(Default)]
struct TenancyState {
    firms: HashMap<FirmId, Firm>,
    companies: HashMap<CompanyId, Company>,
    users: HashMap<UserId, UserAccount>,
}

pub struct InMemoryTenancyService {
    state: RwLock<TenancyState>,
}

impl InMemoryTenancyService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TenancyState::default()),
        }
    }

    #[must_use]
    pub fn from_companies(companies: Vec<Company>) -> Self {
        Self::from_snapshot(TenancySnapshot {
            companies,
            ..TenancySnapshot::default()
        })
    }

    #[must_use]
    pub fn from_snapshot(snapshot: TenancySnapshot) -> Self {
        let mut firms = HashMap::new();
        for firm in snapshot.firms {
            firms.insert(firm.id.clone(), firm);
        }

        let mut companies = HashMap::new();
        for company in snapshot.companies {
            companies.insert(company.id.clone(), company);
        }

        let mut users = HashMap::new();
        for user in snapshot.users {
            users.insert(user.id.clone(), user);
        }

        Self {
            state: RwLock::new(TenancyState {
                firms,
                companies,
                users,
            }),
        }
    }

    pub async fn export_companies(&self) -> Vec<Company> {
        self.export_snapshot().await.companies
    }

    pub async fn export_snapshot(&self) -> TenancySnapshot {
        let guard = self.state.read().await;
        TenancySnapshot {
            firms: guard.firms.values().cloned().collect(),
            companies: guard.companies.values().cloned().collect(),
            users: guard.users.values().cloned().collect(),
        }
    }

    fn generate_company_id() -> CompanyId {
        Uuid::new_v4().to_string()
    }

    fn generate_firm_id() -> FirmId {
        Uuid::new_v4().to_string()
    }

    fn generate_user_id() -> UserId {
        Uuid::new_v4().to_string()
    }

    fn ensure_unique_name(
        state: &TenancyState,
        request: &CreateCompanyRequest,
    ) -> TenancyResult<()> {
        let normalized = normalize_company_name(&request.name);
        let conflict = state.companies.values().any(|company| {
            company.firm_id == request.firm_id
                && company.status == CompanyStatus::Active
                && normalize_company_name(&company.name) == normalized
        });
        if conflict {
            return Err(TenancyError::Conflict(format!(
                "company {} already exists for firm {}",
                request.name, request.firm_id
            )));
        }
        Ok(())
    }

    fn ensure_unique_firm_name(state: &TenancyState, name: &str) -> TenancyResult<()> {
        let normalized = normalize_company_name(name);
        if state
            .firms
            .values()
            .any(|firm| normalize_company_name(&firm.name) == normalized)
        {
            return Err(TenancyError::Conflict(format!(
                "firm {name} already exists"
            )));
        }
        Ok(())
    }

    fn require_firm<'a>(firm_id: &FirmId, state: &'a TenancyState) -> TenancyResult<&'a Firm> {
        state
            .firms
            .get(firm_id)
            .ok_or_else(|| TenancyError::NotFound(format!("firm {firm_id}")))
    }

    fn map_err_not_found(company_id: &str) -> TenancyError {
        TenancyError::NotFound(format!("company {company_id}"))
    }

    fn ensure_unique_user_email(
        state: &TenancyState,
        firm_id: &FirmId,
        email: &str,
    ) -> TenancyResult<()> {
        let normalized = email.to_ascii_lowercase();
        if state
            .users
            .values()
            .any(|user| user.firm_id == *firm_id && user.email.to_ascii_lowercase() == normalized)
        {
            return Err(TenancyError::Conflict(format!(
                "user {email} already exists for firm {firm_id}"
            )));
        }
        Ok(())
    }

    fn map_err_user_not_found(user_id: &str) -> TenancyError {
        TenancyError::NotFound(format!("user {user_id}"))
    }

    fn ensure_user_firm<'a>(
        firm_id: &FirmId,
        user: &'a UserAccount,
        user_id: &str,
    ) -> TenancyResult<&'a UserAccount> {
        if user.firm_id != *firm_id {
            return Err(TenancyError::Rejected(format!(
                "user {user_id} belongs to firm {}, not {firm_id}",
                user.firm_id
            )));
        }
        Ok(user)
    }

    fn ensure_company_firm<'a>(
        firm_id: &FirmId,
        company: &'a Company,
        company_id: &str,
    ) -> TenancyResult<&'a Company> {
        if company.firm_id != *firm_id {
            return Err(TenancyError::Rejected(format!(
                "company {company_id} belongs to firm {}, not {firm_id}",
                company.firm_id
            )));
        }
        Ok(company)
    }
}

impl Default for InMemoryTenancyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TenancyService for InMemoryTenancyService {
    async fn create_firm(&self, request: CreateFirmRequest) -> TenancyResult<Firm> {
        let normalized = request.normalize()?;
        let mut guard = self.state.write().await;
        Self::ensure_unique_firm_name(&guard, &normalized.name)?;
        let firm = Firm {
            id: Self::generate_firm_id(),
            name: normalized.name,
            metadata: normalized.metadata,
            created_at: Utc::now(),
        };
        guard.firms.insert(firm.id.clone(), firm.clone());
        Ok(firm)
    }

    async fn list_firms(&self) -> TenancyResult<Vec<Firm>> {
        let guard = self.state.read().await;
        let mut firms: Vec<_> = guard.firms.values().cloned().collect();
        firms.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(firms)
    }

    async fn get_firm(&self, firm_id: &FirmId) -> TenancyResult<Firm> {
        let guard = self.state.read().await;
        let firm = Self::require_firm(firm_id, &guard)?;
        Ok(firm.clone())
    }

    async fn create_company(&self, request: CreateCompanyRequest) -> TenancyResult<Company> {
        let normalized = request.normalize()?;
        let mut guard = self.state.write().await;
        Self::require_firm(&normalized.firm_id, &guard)?;
        Self::ensure_unique_name(&guard, &normalized)?;
        let company = Company {
            id: Self::generate_company_id(),
            firm_id: normalized.firm_id.clone(),
            name: normalized.name.clone(),
            status: CompanyStatus::Active,
            base_currency: normalized.base_currency.clone(),
            tags: normalized.tags.clone(),
            created_at: Utc::now(),
            archived_at: None,
            metadata: normalized.metadata.clone(),
        };
        guard.companies.insert(company.id.clone(), company.clone());
        Ok(company)
    }

    async fn list_companies(&self, firm_id: &FirmId) -> TenancyResult<Vec<Company>> {
        let guard = self.state.read().await;
        let mut companies: Vec<_> = guard
            .companies
            .values()
            .filter(|company| company.firm_id == *firm_id)
            .cloned()
            .collect();
        companies.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(companies)
    }

    async fn get_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        let guard = self.state.read().await;
        let company = guard
            .companies
            .get(company_id)
            .ok_or_else(|| Self::map_err_not_found(company_id))?;
        Self::ensure_company_firm(firm_id, company, company_id)?;
        Ok(company.clone())
    }

    async fn archive_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        let mut guard = self.state.write().await;
        let company = guard
            .companies
            .get_mut(company_id)
            .ok_or_else(|| Self::map_err_not_found(company_id))?;
        Self::ensure_company_firm(firm_id, company, company_id)?;
        if company.status == CompanyStatus::Archived {
            return Err(TenancyError::Rejected(format!(
                "company {company_id} is already archived"
            )));
        }
        company.status = CompanyStatus::Archived;
        company.archived_at = Some(Utc::now());
        Ok(company.clone())
    }

    async fn reactivate_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        let mut guard = self.state.write().await;
        let company = guard
            .companies
            .get_mut(company_id)
            .ok_or_else(|| Self::map_err_not_found(company_id))?;
        Self::ensure_company_firm(firm_id, company, company_id)?;
        if company.status == CompanyStatus::Active {
            return Err(TenancyError::Rejected(format!(
                "company {company_id} is already active"
            )));
        }
        company.status = CompanyStatus::Active;
        company.archived_at = None;
        Ok(company.clone())
    }

    async fn invite_user(&self, request: InviteUserRequest) -> TenancyResult<UserAccount> {
        let normalized = request.normalize()?;
        let mut guard = self.state.write().await;
        Self::require_firm(&normalized.firm_id, &guard)?;
        Self::ensure_unique_user_email(&guard, &normalized.firm_id, &normalized.email)?;
        let user = UserAccount {
            id: Self::generate_user_id(),
            firm_id: normalized.firm_id.clone(),
            email: normalized.email.clone(),
            display_name: normalized.display_name.clone(),
            roles: normalized.roles.clone(),
            status: UserStatus::Invited,
            invited_at: Utc::now(),
            activated_at: None,
        };
        guard.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn list_users(&self, firm_id: &FirmId) -> TenancyResult<Vec<UserAccount>> {
        let guard = self.state.read().await;
        let mut users: Vec<_> = guard
            .users
            .values()
            .filter(|user| user.firm_id == *firm_id)
            .cloned()
            .collect();
        users.sort_by(|left, right| left.display_name.cmp(&right.display_name));
        Ok(users)
    }

    async fn get_user(&self, firm_id: &FirmId, user_id: &UserId) -> TenancyResult<UserAccount> {
        let guard = self.state.read().await;
        let user = guard
            .users
            .get(user_id)
            .ok_or_else(|| Self::map_err_user_not_found(user_id))?;
        Self::ensure_user_firm(firm_id, user, user_id)?;
        Ok(user.clone())
    }

    async fn set_user_roles(&self, request: UpdateUserRolesRequest) -> TenancyResult<UserAccount> {
        let normalized = request.normalize()?;
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(&normalized.user_id)
            .ok_or_else(|| Self::map_err_user_not_found(&normalized.user_id))?;
        Self::ensure_user_firm(&normalized.firm_id, user, &normalized.user_id)?;
        user.roles = normalized.roles;
        Ok(user.clone())
    }

    async fn update_user_status(
        &self,
        firm_id: &FirmId,
        user_id: &UserId,
        status: UserStatus,
    ) -> TenancyResult<UserAccount> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| Self::map_err_user_not_found(user_id))?;
        Self::ensure_user_firm(firm_id, user, user_id)?;
        user.status = status;
        if status.is_active() && user.activated_at.is_none() {
            user.activated_at = Some(Utc::now());
        }
        Ok(user.clone())
    }
}
