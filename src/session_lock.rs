//! Cooperative session locking via engine-side advisory locks.
//!
//! Locks are keyed by a name composed from the database, the table prefix
//! and a caller-supplied row id, so no dedicated lock table is needed. A
//! failed acquire raises [`MssqlAdapterError::SessionWait`] — a kind of its
//! own, so callers can retry/back off without catching generic failures.

use std::time::Duration;

use tracing::warn;

use crate::adapter::MssqlAdapter;
use crate::error::MssqlAdapterError;
use crate::types::{ParamSet, SqlValue};

/// Maps the sp_getapplock return code: negative means the lock was not
/// granted (timeout, deadlock victim, or call failure).
pub(crate) fn check_applock_result(code: i64) -> Result<(), MssqlAdapterError> {
    if code < 0 {
        Err(MssqlAdapterError::SessionWait(format!(
            "could not acquire session lock within timeout (result code {code})"
        )))
    } else {
        Ok(())
    }
}

impl MssqlAdapter {
    #[must_use]
    pub fn session_lock_supported(&self) -> bool {
        true
    }

    fn session_lock_name(&self, row_id: i64) -> String {
        format!(
            "{}-{}-session-{}",
            self.options().database,
            self.options().prefix,
            row_id
        )
    }

    /// Acquire an exclusive, session-scoped advisory lock.
    ///
    /// # Errors
    ///
    /// [`MssqlAdapterError::SessionWait`] when the engine reports the lock
    /// was not granted within `timeout`; execution errors otherwise.
    pub async fn acquire_session_lock(
        &self,
        row_id: i64,
        timeout: Duration,
    ) -> Result<(), MssqlAdapterError> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);

        let sql = "BEGIN
    DECLARE @result INT
    EXECUTE @result = sp_getapplock @Resource = ?,
                                    @LockMode = ?,
                                    @LockOwner = ?,
                                    @LockTimeout = ?
    SELECT @result
END";
        let params = ParamSet::positional(vec![
            SqlValue::Text(self.session_lock_name(row_id)),
            SqlValue::Text("Exclusive".into()),
            SqlValue::Text("Session".into()),
            SqlValue::Int(timeout_ms),
        ]);

        let result_set = self.aux_query(sql, params).await?;
        let code = result_set
            .rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(|value| value.as_int().copied())
            .ok_or_else(|| {
                MssqlAdapterError::Execution("sp_getapplock returned no result code".into())
            })?;

        check_applock_result(code)
    }

    /// Release a session lock. Best-effort: only attempted when this
    /// connection backs a session store, and engine failures are logged
    /// rather than raised.
    ///
    /// # Errors
    ///
    /// Kept fallible for interface symmetry; the release itself never
    /// raises.
    pub async fn release_session_lock(&self, row_id: i64) -> Result<(), MssqlAdapterError> {
        if !self.options().used_for_sessions {
            return Ok(());
        }

        let sql = "sp_releaseapplock ?, ?";
        let params = ParamSet::positional(vec![
            SqlValue::Text(self.session_lock_name(row_id)),
            SqlValue::Text("Session".into()),
        ]);

        if let Err(e) = self.aux_execute(sql, params).await {
            warn!(row_id, error = %e, "session lock release failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_result_code_raises_session_wait() {
        let err = check_applock_result(-1).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::SessionWait(_)));
        let err = check_applock_result(-999).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::SessionWait(_)));
    }

    #[test]
    fn granted_codes_pass() {
        // 0 = granted immediately, 1 = granted after wait
        assert!(check_applock_result(0).is_ok());
        assert!(check_applock_result(1).is_ok());
    }
}
