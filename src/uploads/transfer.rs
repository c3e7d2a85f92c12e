// src/uploads/transfer.rs
//! Transfer executors move one file's bytes and report progress as a stream of events.
//! The driver only sees `TransferExecutor`, so simulated and real I/O are interchangeable.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::config::AppConfig;
use crate::models::FileHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "percent", rename_all = "lowercase")]
pub enum TransferEvent {
    /// Percentage of bytes sent so far
    Progress(u8),
    /// All bytes sent; waiting on the remote side
    Processing,
    Completed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Upload failed: {0}")]
    Failed(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Could not read file: {0}")]
    Io(String),
    #[error("Transfer ended before completion")]
    Interrupted,
}

impl TransferError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Rejected { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            TransferError::Io(_) => false,
            _ => true,
        }
    }
}

pub type TransferStream = BoxStream<'static, Result<TransferEvent, TransferError>>;

/// Capability that uploads one file.
///
/// The stream ends after `Completed` or after the first error. Dropping it abandons the transfer.
pub trait TransferExecutor: Send + Sync {
    fn send(&self, file: FileHandle) -> TransferStream;
}

/// Fixed-cadence stand-in for a network transfer: +`step`% every `tick`
#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    step: u8,
    tick: Duration,
    failures: HashMap<String, u8>,
}

impl SimulatedTransfer {
    pub fn new(step: u8, tick: Duration) -> Self {
        Self {
            step: step.clamp(1, 100),
            tick,
            failures: HashMap::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.upload_step_percent, config.upload_tick)
    }

    /// Make every transfer of `file_name` fail right after reporting `at_percent`
    pub fn fail_file_at(mut self, file_name: impl Into<String>, at_percent: u8) -> Self {
        self.failures.insert(file_name.into(), at_percent.min(100));
        self
    }
}

impl Default for SimulatedTransfer {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(100))
    }
}

enum SimState {
    Tick(u8),
    Fail(u8),
    Finish,
    Done,
}

impl TransferExecutor for SimulatedTransfer {
    fn send(&self, file: FileHandle) -> TransferStream {
        let step = self.step;
        let tick = self.tick;
        let fail_at = self.failures.get(file.name()).copied();

        stream::unfold(SimState::Tick(0), move |state| async move {
            match state {
                SimState::Tick(percent) => {
                    tokio::time::sleep(tick).await;
                    let next = if fail_at.map_or(false, |at| percent >= at) {
                        SimState::Fail(percent)
                    } else if percent >= 100 {
                        SimState::Finish
                    } else {
                        SimState::Tick(percent.saturating_add(step).min(100))
                    };
                    Some((Ok(TransferEvent::Progress(percent)), next))
                }
                SimState::Fail(percent) => Some((
                    Err(TransferError::Failed(format!("simulated transfer failure at {}%", percent))),
                    SimState::Done,
                )),
                SimState::Finish => Some((Ok(TransferEvent::Completed), SimState::Done)),
                SimState::Done => None,
            }
        })
        .boxed()
    }
}

/// Multipart upload to an HTTP endpoint, progress measured on the request body
#[derive(Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
    endpoint: String,
    field_name: String,
}

impl HttpTransfer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            field_name: "files".to_string(),
        }
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }
}

impl TransferExecutor for HttpTransfer {
    fn send(&self, file: FileHandle) -> TransferStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let field_name = self.field_name.clone();

        tokio::spawn(async move {
            let name = file.name().to_string();
            let upload = upload_multipart(client, endpoint, field_name, file, tx.clone());
            tokio::select! {
                result = upload => {
                    let _ = tx.send(result.map(|_| TransferEvent::Completed));
                }
                _ = tx.closed() => {
                    tracing::debug!("Upload of {} abandoned by its consumer", name);
                }
            }
        });

        // ends at the first terminal event even if a sender clone is still alive inside the client
        stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            let item = rx.recv().await?;
            let terminal = matches!(item, Ok(TransferEvent::Completed) | Err(_));
            Some((item, if terminal { None } else { Some(rx) }))
        })
        .boxed()
    }
}

type EventSender = mpsc::UnboundedSender<Result<TransferEvent, TransferError>>;

fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

async fn upload_multipart(
    client: reqwest::Client,
    endpoint: String,
    field_name: String,
    file: FileHandle,
    events: EventSender,
) -> Result<(), TransferError> {
    let reader = file.open().await.map_err(|e| TransferError::Io(e.to_string()))?;
    let total = file.size();
    let _ = events.send(Ok(TransferEvent::Progress(0)));

    let progress = events.clone();
    let mut sent: u64 = 0;
    let mut reported: u8 = 0;
    let mut processing = false;
    let body = ReaderStream::new(reader).inspect_ok(move |chunk| {
        sent += chunk.len() as u64;
        let percent = percent_of(sent, total);
        if percent > reported {
            reported = percent;
            let _ = progress.send(Ok(TransferEvent::Progress(percent)));
        }
        if sent >= total && !processing {
            processing = true;
            let _ = progress.send(Ok(TransferEvent::Processing));
        }
    });

    let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
        .file_name(file.name().to_string())
        .mime_str(file.mime_type())
        .map_err(|e| TransferError::Failed(format!("Invalid MIME type: {}", e)))?;
    let form = reqwest::multipart::Form::new().part(field_name, part);

    tracing::debug!("Uploading {} ({} bytes) to {}", file.name(), total, endpoint);
    let response = client
        .post(&endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| TransferError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransferError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}
