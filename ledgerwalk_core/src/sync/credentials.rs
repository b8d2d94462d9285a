use crate::error::AuthFailure;
use crate::models::{AccountId, Credential};
use crate::store::SyncDb;
use crate::sync::traits::CredentialInvalidationHandler;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Looks up the credential a walker should use for an account.
#[derive(Clone)]
pub struct CredentialResolver {
    db: Arc<dyn SyncDb>,
}

impl CredentialResolver {
    pub fn new(db: Arc<dyn SyncDb>) -> Self {
        Self { db }
    }

    /// `Ok(None)` when the account is unknown, has no credential, or its
    /// credential is flagged invalid. None of those are errors.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, account_id: AccountId) -> Result<Option<Credential>> {
        let Some(account) = self.db.get_account(account_id).await? else {
            tracing::debug!(%account_id, "account not found");
            return Ok(None);
        };
        let Some(credential_id) = account.credential_id else {
            return Ok(None);
        };
        let credential = self.db.get_credential(credential_id).await?;
        Ok(credential.filter(|c| c.is_valid))
    }
}

/// Flags credentials invalid when the service rejects them permanently.
///
/// Temporary rejections leave the flag alone so the next sweep tries again.
#[derive(Clone)]
pub struct InvalidateRejectedCredentials {
    db: Arc<dyn SyncDb>,
}

impl InvalidateRejectedCredentials {
    pub fn new(db: Arc<dyn SyncDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialInvalidationHandler for InvalidateRejectedCredentials {
    #[tracing::instrument(level = "debug", skip(self, credential))]
    async fn on_auth_failure(
        &self,
        account_id: AccountId,
        credential: &Credential,
        failure: &AuthFailure,
    ) -> Result<()> {
        if !failure.kind.is_permanent() {
            tracing::info!(
                %account_id,
                key_id = credential.key_id,
                failure = %failure,
                "credential temporarily rejected; leaving it valid"
            );
            return Ok(());
        }
        tracing::warn!(
            %account_id,
            key_id = credential.key_id,
            failure = %failure,
            "credential rejected; marking invalid"
        );
        self.db.set_credential_validity(credential.id, false).await
    }
}
