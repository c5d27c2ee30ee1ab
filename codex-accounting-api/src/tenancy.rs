use std::sync::Arc;

use codex_tenancy::Company;
use codex_tenancy::CompanyId;
use codex_tenancy::CreateCompanyRequest;
use codex_tenancy::CreateFirmRequest;
use codex_tenancy::Firm;
use codex_tenancy::FirmId;
use codex_tenancy::InviteUserRequest;
use codex_tenancy::TenancyResult;
use codex_tenancy::TenancyService;
use codex_tenancy::UpdateUserRolesRequest;
use codex_tenancy::UserAccount;
use codex_tenancy::UserId;
use codex_tenancy::UserStatus;

#[derive(Clone)]
pub struct TenancyFacade {
    service: Arc<dyn TenancyService>,
}

impl TenancyFacade {
    pub fn new(service: Arc<dyn TenancyService>) -> Self {
        Self { service }
    }

    pub async fn create_firm(&self, request: CreateFirmRequest) -> TenancyResult<Firm> {
        self.service.create_firm(request).await
    }

    pub async fn list_firms(&self) -> TenancyResult<Vec<Firm>> {
        self.service.list_firms().await
    }

    pub async fn get_firm(&self, firm_id: &FirmId) -> TenancyResult<Firm> {
        self.service.get_firm(firm_id).await
    }

    pub async fn create_company(&self, request: CreateCompanyRequest) -> TenancyResult<Company> {
        self.service.create_company(request).await
    }

    pub async fn list_companies(&self, firm_id: &FirmId) -> TenancyResult<Vec<Company>> {
        self.service.list_companies(firm_id).await
    }

    pub async fn get_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        self.service.get_company(firm_id, company_id).await
    }

    pub async fn archive_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        self.service.archive_company(firm_id, company_id).await
    }

    pub async fn reactivate_company(
        &self,
        firm_id: &FirmId,
        company_id: &CompanyId,
    ) -> TenancyResult<Company> {
        self.service.reactivate_company(firm_id, company_id).await
    }

    pub async fn invite_user(&self, request: InviteUserRequest) -> TenancyResult<UserAccount> {
        self.service.invite_user(request).await
    }

    pub async fn list_users(&self, firm_id: &FirmId) -> TenancyResult<Vec<UserAccount>> {
        self.service.list_users(firm_id).await
    }

    pub async fn get_user(&self, firm_id: &FirmId, user_id: &UserId) -> TenancyResult<UserAccount> {
        self.service.get_user(firm_id, user_id).await
    }

    pub async fn set_user_roles(
        &self,
        request: UpdateUserRolesRequest,
    ) -> TenancyResult<UserAccount> {
        self.service.set_user_roles(request).await
    }

    pub async fn update_user_status(
        &self,
        firm_id: &FirmId,
        user_id: &UserId,
        status: UserStatus,
    ) -> TenancyResult<UserAccount> {
        self.service
            .update_user_status(firm_id, user_id, status)
            .await
    }
}
