//! `test`: echoes its parameters back. Used by clients to check a credential.

use super::CommandContext;
use crate::domain::envelope::ResponseMap;
use crate::domain::error::NuboResult;
use rmpv::Value;

pub fn handle(_ctx: &mut CommandContext<'_>, params: Option<&Value>) -> NuboResult<ResponseMap> {
    Ok(ResponseMap::new().with("test", params.cloned().unwrap_or(Value::Nil)))
}
