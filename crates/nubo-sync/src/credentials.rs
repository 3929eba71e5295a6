//! Selector/validator credential manager.
//!
//! Every successful refresh rotates the validator, so a token is usable for
//! exactly one request. Presenting a stale validator for a known selector
//! is treated as theft: the computer's credential is cleared and it has to
//! run `init` again.

use crate::domain::credential::{digest_validator, digests_match, AuthToken, CredentialError};
use crate::domain::entities::NewComputer;
use crate::ports::outbound::{
    CredentialManager, RandomTokenSource, SyncStore, SystemTimeSource, TimeSource, TokenSource,
};
use rmpv::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct TokenCredentialManager {
    clock: Arc<dyn TimeSource>,
    tokens: Arc<dyn TokenSource>,
    token_bytes: usize,
}

impl TokenCredentialManager {
    pub fn new(clock: Arc<dyn TimeSource>, tokens: Arc<dyn TokenSource>, token_bytes: usize) -> Self {
        Self {
            clock,
            tokens,
            token_bytes,
        }
    }

    /// Wall clock and CSPRNG.
    pub fn with_defaults(token_bytes: usize) -> Self {
        Self::new(
            Arc::new(SystemTimeSource),
            Arc::new(RandomTokenSource),
            token_bytes,
        )
    }

    fn new_token_part(&self) -> String {
        self.tokens.hex_token(self.token_bytes)
    }

    fn rotate(&self, store: &mut dyn SyncStore, token: AuthToken) -> Result<Value, CredentialError> {
        let computer = store
            .find_computer_by_selector(&token.selector)?
            .ok_or(CredentialError::UnknownSelector)?;
        let stored = computer
            .validator_digest
            .as_deref()
            .ok_or(CredentialError::Revoked)?;

        if !digests_match(stored, &digest_validator(&token.validator)) {
            warn!(
                selector = %token.selector,
                computer_id = computer.computer_id,
                "Validator mismatch, revoking credential"
            );
            store.revoke_credentials(computer.computer_id)?;
            return Err(CredentialError::ValidatorMismatch);
        }

        let validator = self.new_token_part();
        store.update_validator(
            computer.computer_id,
            &digest_validator(&validator),
            self.clock.now(),
        )?;
        Ok(AuthToken::new(token.selector, validator).to_value())
    }
}

impl CredentialManager for TokenCredentialManager {
    /// Check and rotation share one transaction, so two requests racing on
    /// the same token cannot both pass.
    fn refresh(
        &self,
        store: &mut dyn SyncStore,
        credential: &Value,
    ) -> Result<Value, CredentialError> {
        let token = AuthToken::parse(credential)?;

        store.begin()?;
        match self.rotate(store, token) {
            // A mismatch has already revoked the computer; keep that.
            result @ (Ok(_) | Err(CredentialError::ValidatorMismatch)) => {
                store.commit()?;
                result
            }
            Err(err) => {
                if let Err(e) = store.rollback() {
                    warn!(error = %e, "Rollback after failed refresh");
                }
                Err(err)
            }
        }
    }

    fn issue(
        &self,
        store: &mut dyn SyncStore,
        computer: &str,
        hostname: &str,
    ) -> Result<Value, CredentialError> {
        let token = AuthToken::new(self.new_token_part(), self.new_token_part());
        let computer_id = store.register_computer(&NewComputer {
            hostname: hostname.to_string(),
            computer: computer.to_string(),
            selector: token.selector.clone(),
            validator_digest: digest_validator(&token.validator),
            atime: self.clock.now(),
        })?;
        info!(computer_id, selector = %token.selector, "Issued credential");
        Ok(token.to_value())
    }
}
