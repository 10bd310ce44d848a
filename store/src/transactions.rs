//! Transaction helpers.
//!
//! Multi-row writes (a deliverable plus its progress entries, an original plus
//! its reconciliation record) run inside one transaction so they commit or
//! roll back together.

use ledger_engine::{StoreError, StoreResult};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};

/// Execute `operation` within a transaction.
///
/// Commits on `Ok`; on `Err` the transaction is dropped, which rolls it back.
pub fn execute_in_transaction<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> StoreResult<T>
where
    F: FnOnce(&Transaction) -> StoreResult<T>,
{
    let tx = conn
        .transaction_with_behavior(behavior)
        .map_err(|e| StoreError::backend_with_source("failed to begin transaction", e))?;

    let result = operation(&tx)?;
    tx.commit()
        .map_err(|e| StoreError::backend_with_source("failed to commit transaction", e))?;
    Ok(result)
}

/// Whether `err` is a UNIQUE / PRIMARY KEY / CHECK constraint violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Map an insert/update failure, turning uniqueness clashes into
/// [`StoreError::Duplicate`].
pub(crate) fn write_err(
    entity: &'static str,
    id: impl ToString,
    context: &'static str,
) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let id = id.to_string();
    move |e| {
        if is_unique_violation(&e) {
            StoreError::Duplicate { entity, id }
        } else if is_constraint_violation(&e) {
            StoreError::Invariant {
                message: format!("{entity} {id} rejected by schema: {e}"),
            }
        } else {
            StoreError::backend_with_source(context, e)
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL);")
            .expect("schema");
        conn
    }

    #[test]
    fn commits_on_success() {
        let mut conn = conn();
        execute_in_transaction(&mut conn, TransactionBehavior::Immediate, |tx| {
            tx.execute("INSERT INTO t (id, v) VALUES (1, 'a')", [])
                .map_err(|e| StoreError::backend_with_source("insert", e))?;
            Ok(())
        })
        .expect("commit");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
    }

    #[test]
    fn rolls_back_on_error() {
        let mut conn = conn();
        let result: StoreResult<()> =
            execute_in_transaction(&mut conn, TransactionBehavior::Immediate, |tx| {
                tx.execute("INSERT INTO t (id, v) VALUES (1, 'a')", [])
                    .map_err(|e| StoreError::backend_with_source("insert", e))?;
                Err(StoreError::backend("abort"))
            });
        assert!(result.is_err());
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }

    #[test]
    fn primary_key_clash_maps_to_duplicate() {
        let conn = conn();
        conn.execute("INSERT INTO t (id, v) VALUES (1, 'a')", [])
            .expect("first");
        let err = conn
            .execute("INSERT INTO t (id, v) VALUES (1, 'b')", [])
            .map_err(write_err("row", 1, "insert"))
            .expect_err("clash");
        assert!(matches!(err, StoreError::Duplicate { entity: "row", .. }));
    }
}
