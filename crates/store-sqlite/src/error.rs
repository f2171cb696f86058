use core_model::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("evidence is {size} bytes after sanitizing; the limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("run status cannot move from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },
    #[error("{entity} {id} references a missing {owner}")]
    MissingOwner {
        entity: &'static str,
        id: i64,
        owner: &'static str,
    },
    #[error("store is not backed by a file")]
    NotFileBacked,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Maps a foreign-key failure on insert to `NotFound` for the owner row.
pub(crate) fn owner_not_found(err: rusqlite::Error, owner: &'static str, id: i64) -> StoreError {
    if is_foreign_key_violation(&err) {
        StoreError::NotFound { entity: owner, id }
    } else {
        err.into()
    }
}
