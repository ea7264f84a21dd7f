use super::DbPool;
use crate::errors::StorageError;
use diesel::SqliteConnection;
use livesync_core::errors::{Error, Result};
use log::error;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

// A write job runs on the actor's connection inside an immediate transaction.
type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static>;

type Reply = oneshot::Sender<Result<Box<dyn Any + Send + 'static>>>;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<(Job<Box<dyn Any + Send + 'static>>, Reply)>,
}

impl WriteHandle {
    /// Executes a database job on the writer actor's dedicated connection.
    ///
    /// Jobs run one at a time, each inside an immediate transaction, so
    /// check-then-write jobs (like compare-and-set status updates) are atomic.
    /// A stopped actor is reported as `Error::StoreUnavailable`.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static + Any,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)),
                ret_tx,
            ))
            .await
            .map_err(|_| StorageError::WriterStopped("job channel closed".to_string()))?;

        let boxed = ret_rx
            .await
            .map_err(|_| StorageError::WriterStopped("reply dropped".to_string()))??;

        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| Error::Unexpected("writer actor returned an unexpected type".to_string()))
    }
}

/// Spawns a background Tokio task that acts as the single writer to the
/// database. The actor owns one pooled connection and processes jobs serially.
pub fn spawn_writer(pool: Arc<DbPool>) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<(Job<Box<dyn Any + Send + 'static>>, Reply)>(1024);

    tokio::spawn(async move {
        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Writer actor could not acquire a connection: {}", e);
                let reason = e.to_string();
                // Fail every queued job instead of leaving callers hanging.
                while let Some((_, reply_tx)) = rx.recv().await {
                    let _ = reply_tx.send(Err(Error::StoreUnavailable(reason.clone())));
                }
                return;
            }
        };

        while let Some((job, reply_tx)) = rx.recv().await {
            let result: Result<Box<dyn Any + Send + 'static>> = conn
                .immediate_transaction::<_, StorageError, _>(|c| job(c).map_err(StorageError::from))
                .map_err(Error::from);

            // The caller may have gone away (timeout, cancellation).
            let _ = reply_tx.send(result);
        }
    });

    WriteHandle { tx }
}
