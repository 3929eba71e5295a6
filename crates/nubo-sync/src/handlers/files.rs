//! File synchronisation commands: `directory`, `put`, `get`, `delete`.
//!
//! Rows live in `tbl_file`; contents live in archive storage under the row
//! id. An empty hash marks a directory, which has no content.

use super::{CommandContext, Params};
use crate::domain::entities::FileRecord;
use crate::domain::envelope::ResponseMap;
use crate::domain::error::{NuboError, NuboResult};
use rmpv::Value;
use tracing::{debug, warn};

/// `directory`: every known file with its hash.
pub fn directory(ctx: &mut CommandContext<'_>, _params: Option<&Value>) -> NuboResult<ResponseMap> {
    let listing = ctx
        .store
        .list_files()?
        .into_iter()
        .map(|file| {
            Value::Map(vec![
                (Value::from("f"), Value::from(file.filename)),
                (Value::from("h"), Value::from(file.hash)),
            ])
        })
        .collect();
    Ok(ResponseMap::new().with("result", Value::Array(listing)))
}

/// `put`: creates or replaces a file, writing its content when it has one.
pub fn put(ctx: &mut CommandContext<'_>, params: Option<&Value>) -> NuboResult<ResponseMap> {
    let params = Params::new(params);
    let name = params.str("name")?;
    let hash = params.str("hash")?;
    let mtime = params.int("mtime")?;
    let content = if hash.is_empty() {
        None
    } else {
        Some(params.bytes("content")?)
    };

    ctx.store.begin()?;
    match store_file(ctx, name, hash, mtime, content) {
        Ok(()) => {
            ctx.store.commit()?;
            debug!(name, hash, "Stored file");
            Ok(ResponseMap::new())
        }
        Err(err) => {
            if let Err(e) = ctx.store.rollback() {
                warn!(error = %e, "Rollback after failed put");
            }
            Err(err)
        }
    }
}

fn store_file(
    ctx: &mut CommandContext<'_>,
    name: &str,
    hash: &str,
    mtime: i64,
    content: Option<&[u8]>,
) -> NuboResult<()> {
    let file_id = match ctx.store.find_file(name)? {
        Some(existing) => {
            ctx.store.update_file(existing.file_id, hash, mtime)?;
            if content.is_none() && !existing.is_directory() {
                // Became a directory: the old content is garbage.
                remove_archive(ctx, existing.file_id);
            }
            existing.file_id
        }
        None => ctx.store.insert_file(name, hash, mtime)?,
    };

    if let Some(content) = content {
        ctx.archives.write(file_id, content).map_err(|e| {
            warn!(error = %e, name, "Archive write failed");
            NuboError::from(e)
        })?;
    }
    Ok(())
}

/// `get`: metadata and content of one file.
pub fn get(ctx: &mut CommandContext<'_>, params: Option<&Value>) -> NuboResult<ResponseMap> {
    let name = Params::new(params).str("name")?;
    let file = ctx.store.find_file(name)?.ok_or_else(|| {
        debug!(name, "Get of unknown file");
        NuboError::storage()
    })?;

    let content = if file.is_directory() {
        Value::Nil
    } else {
        let bytes = ctx.archives.read(file.file_id).map_err(|e| {
            warn!(error = %e, name, "Archive read failed");
            NuboError::from(e)
        })?;
        Value::Binary(bytes)
    };

    let FileRecord { hash, mtime, .. } = file;
    Ok(ResponseMap::new()
        .with("hash", Value::from(hash))
        .with("mtime", Value::from(mtime))
        .with("content", content))
}

/// `delete`: removes a file. Unknown names are not an error.
pub fn delete(ctx: &mut CommandContext<'_>, params: Option<&Value>) -> NuboResult<ResponseMap> {
    let name = Params::new(params).str("name")?;
    if let Some(file) = ctx.store.find_file(name)? {
        ctx.store.delete_file(file.file_id)?;
        if !file.is_directory() {
            remove_archive(ctx, file.file_id);
        }
    }
    Ok(ResponseMap::new())
}

fn remove_archive(ctx: &CommandContext<'_>, file_id: i64) {
    if let Err(e) = ctx.archives.remove(file_id) {
        debug!(error = %e, file_id, "Archive removal failed");
    }
}
