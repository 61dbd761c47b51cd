use std::sync::Arc;
use std::time::Duration;

use sluice_core::AccountId;
use sluice_store::{CredentialStore, StoreError};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::timeout::bounded;

/// Checks presented API keys against the credential store.
///
/// Every failure mode denies: a missing credential, a mismatched key, a
/// store error and a lookup that exceeds the call timeout all yield `false`.
#[derive(Clone)]
pub struct AuthGate {
    credentials: Arc<dyn CredentialStore>,
    call_timeout: Duration,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn new(credentials: Arc<dyn CredentialStore>, call_timeout: Duration) -> Self {
        Self {
            credentials,
            call_timeout,
        }
    }

    /// Whether `presented` is the stored key for `account_id`.
    #[instrument(skip(self, presented), fields(account_id = %account_id))]
    pub async fn authorize(&self, account_id: &AccountId, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        let lookup = bounded(
            self.call_timeout,
            self.credentials.get(account_id),
            StoreError::Timeout,
        )
        .await;

        match lookup {
            Ok(Some(credential)) => {
                let matches: bool = credential
                    .api_key
                    .as_bytes()
                    .ct_eq(presented.as_bytes())
                    .into();
                if !matches {
                    debug!("API key mismatch");
                }
                matches
            }
            Ok(None) => {
                debug!("no credential stored for account");
                false
            }
            Err(e) => {
                warn!(error = %e, "credential lookup failed, denying");
                false
            }
        }
    }
}
