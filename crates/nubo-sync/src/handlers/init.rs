//! `init`: the bootstrap command.
//!
//! Registers a computer after checking the install password and returns its
//! first credential. Any earlier registration under the same computer name is
//! dropped first, and stays dropped even when the password is wrong.

use super::{CommandContext, Params};
use crate::domain::credential::{PasswordError, PasswordRecord};
use crate::domain::entities::config_keys;
use crate::domain::envelope::{ResponseMap, KEY_AUTH};
use crate::domain::error::{ErrorCode, NuboError, NuboResult};
use rmpv::Value;
use tracing::{error, info, warn};

pub fn handle(ctx: &mut CommandContext<'_>, params: Option<&Value>) -> NuboResult<ResponseMap> {
    let params = Params::new(params);
    let password = params.str("password")?;
    let computer = params.str("computer")?;
    let hostname = params.str("hostname")?;
    let want_salt = params.flag("salt");

    ctx.store.begin()?;
    let (auth, salt) = match register(ctx, password, computer, hostname, want_salt) {
        Ok(registered) => {
            ctx.store.commit()?;
            info!(computer, hostname, "Registered computer");
            registered
        }
        Err(err) if err.code == ErrorCode::Forbidden => {
            ctx.store.commit()?;
            warn!(computer, hostname, "Init refused: wrong password");
            return Err(err);
        }
        Err(err) => {
            if let Err(e) = ctx.store.rollback() {
                warn!(error = %e, "Rollback after failed init");
            }
            return Err(err);
        }
    };

    let mut response = ResponseMap::new().with(KEY_AUTH, auth);
    if let Some(salt) = salt {
        response.insert_if_absent("salt", Value::Binary(salt));
    }
    Ok(response)
}

/// Runs inside the transaction, so the salt is read before anything commits.
fn register(
    ctx: &mut CommandContext<'_>,
    password: &str,
    computer: &str,
    hostname: &str,
    want_salt: bool,
) -> NuboResult<(Value, Option<Vec<u8>>)> {
    ctx.store.delete_computer_by_name(computer)?;

    let stored = ctx.store.config_value(config_keys::PASSWORD)?.ok_or_else(|| {
        error!("No password record in tbl_config");
        NuboError::internal()
    })?;
    let stored =
        std::str::from_utf8(&stored).map_err(|_| PasswordError::Malformed("not UTF-8"))?;
    if !PasswordRecord::parse(stored)?.verify(password) {
        return Err(NuboError::forbidden());
    }

    let auth = ctx.credentials.issue(ctx.store, computer, hostname)?;
    let salt = if want_salt {
        ctx.store.config_value(config_keys::SALT)?
    } else {
        None
    };
    Ok((auth, salt))
}
