use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::core::{Principal, Result, Work, WorkResult};
use crate::executor::{CallContext, Executor, Session};
use crate::readonly::ReadOnlyStatus;
use crate::store::{EnumId, TxnMode};

/// Creates missing enumeration rows, adapting to read-only deployments
///
/// Each call runs one batch of lookups and inserts as a single unit of
/// privileged work. Against a read-only database the batch runs in a
/// read-only transaction and missing values come back as `None` with a
/// warning, never as an error.
pub struct EnumEnsurer {
    executor: Arc<Executor>,
    status: ReadOnlyStatus,
}

impl EnumEnsurer {
    pub fn new(executor: Arc<Executor>, status: ReadOnlyStatus) -> Self {
        Self { executor, status }
    }

    pub fn status(&self) -> ReadOnlyStatus {
        self.status
    }

    /// Resolve ids for `values` in `class`, creating absent rows when
    /// the database is writable
    ///
    /// The returned ids line up with the input order.
    pub async fn ensure(
        &self,
        principal: Principal,
        class: &str,
        values: &[&str],
    ) -> Result<Vec<Option<EnumId>>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        // the transaction mode is fixed before the work starts, a
        // read-only database never sees a write transaction
        let work = EnsureValues {
            description: format!("ensure {} '{class}' enumeration values", values.len()),
            class: class.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            mode: if self.status.is_db_read_only() {
                TxnMode::ReadOnly
            } else {
                TxnMode::ReadWrite
            },
        };

        let context = CallContext::new();
        self.executor.execute(&context, Some(principal), &work).await
    }
}

struct EnsureValues {
    description: String,
    class: String,
    values: Vec<String>,
    mode: TxnMode,
}

#[async_trait]
impl Work for EnsureValues {
    type Output = Vec<Option<EnumId>>;

    fn description(&self) -> &str {
        &self.description
    }

    fn transaction_mode(&self) -> TxnMode {
        self.mode
    }

    async fn run(&self, session: &Session) -> WorkResult<Vec<Option<EnumId>>> {
        let mut ids = Vec::with_capacity(self.values.len());

        for value in &self.values {
            match session.enum_id(&self.class, value).await? {
                Some(id) => ids.push(Some(id)),
                None if self.mode == TxnMode::ReadWrite => {
                    let id = session.insert_enum(&self.class, value).await?;
                    debug!("created enumeration row {}:{value} -> {id}", self.class);
                    ids.push(Some(id));
                }
                None => {
                    warn!(
                        "enumeration value {}:{value} is missing and the database is read-only",
                        self.class
                    );
                    ids.push(None);
                }
            }
        }

        Ok(ids)
    }
}
