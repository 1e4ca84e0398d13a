use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::PipelineEvent;

/// Why a run stopped before reaching its normal end
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Halt {
    Cancelled,
    Disconnected,
    Failed(String),
}

/// Event channel of one run, bound to the run's cancellation token
pub(crate) struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<PipelineEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub(crate) async fn emit(&self, event: PipelineEvent) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| Halt::Disconnected),
        }
    }

    /// Best-effort send that never waits
    pub(crate) fn try_emit(&self, event: PipelineEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Run `future` unless the run is cancelled first
    pub(crate) async fn guard<F: Future>(&self, future: F) -> Result<F::Output, Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            output = future => Ok(output),
        }
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
