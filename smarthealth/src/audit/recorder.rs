//! Channel handoff between request handlers and the access-log writer.
//!
//! ```text
//! handler → AuditRecorder::record (try_send) → channel → AuditWriter::run
//!                                                              ↓
//!                                                  [block for one entry]
//!                                                              ↓
//!                                               [drain up to batch_size more]
//!                                                              ↓
//!                                              Storage::append_access_logs
//! ```
//!
//! `record` never waits and never fails: a full or closed channel drops the entry with a
//! warning. Write failures are logged by the writer and the batch is discarded.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::{AuditAction, AuditContext};
use crate::{
    config::AuditConfig,
    db::{Storage, models::access_logs::AccessLogCreateDBRequest},
    types::AccountId,
};

/// Cloneable sending half, held in `AppState`
#[derive(Clone)]
pub struct AuditRecorder {
    sender: mpsc::Sender<AccessLogCreateDBRequest>,
}

impl AuditRecorder {
    pub fn record(&self, action: AuditAction, actor: Option<AccountId>, context: &AuditContext) {
        let entry = AccessLogCreateDBRequest {
            account_id: actor,
            action: action.as_str().to_string(),
            resource: context.resource.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            created_at: Utc::now(),
        };

        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!(action = %entry.action, resource = %entry.resource, "Audit channel full, dropping entry");
            }
            Err(TrySendError::Closed(entry)) => {
                warn!(action = %entry.action, resource = %entry.resource, "Audit writer stopped, dropping entry");
            }
        }
    }
}

/// Background task that persists queued entries in batches
pub struct AuditWriter {
    storage: Arc<dyn Storage>,
    receiver: mpsc::Receiver<AccessLogCreateDBRequest>,
    batch_size: usize,
}

impl AuditWriter {
    pub fn new(storage: Arc<dyn Storage>, config: &AuditConfig) -> (Self, AuditRecorder) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity);
        let writer = Self {
            storage,
            receiver,
            batch_size: config.batch_size,
        };
        (writer, AuditRecorder { sender })
    }

    /// Write loop. Returns once `shutdown` fires and the channel is drained, or once every
    /// recorder has been dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(batch_size = self.batch_size, "Audit writer started");
        let mut buffer = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, draining audit channel");
                    self.receiver.close();
                    while let Some(entry) = self.receiver.recv().await {
                        buffer.push(entry);
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    self.flush(&mut buffer).await;
                    info!("Audit writer shutdown complete");
                    break;
                }

                maybe_entry = self.receiver.recv() => {
                    match maybe_entry {
                        Some(entry) => buffer.push(entry),
                        None => {
                            info!("Audit channel closed, stopping writer");
                            self.flush(&mut buffer).await;
                            break;
                        }
                    }
                }
            }

            while buffer.len() < self.batch_size {
                match self.receiver.try_recv() {
                    Ok(entry) => buffer.push(entry),
                    Err(_) => break,
                }
            }

            self.flush(&mut buffer).await;
        }
    }

    async fn flush(&self, buffer: &mut Vec<AccessLogCreateDBRequest>) {
        if buffer.is_empty() {
            return;
        }

        let count = buffer.len();
        async {
            match self.storage.append_access_logs(buffer.as_slice()).await {
                Ok(()) => debug!("Wrote audit batch"),
                Err(e) => warn!(error = %e, "Audit log write failed, entries dropped"),
            }
        }
        .instrument(info_span!("flush_audit_batch", count))
        .await;

        buffer.clear();
    }
}
