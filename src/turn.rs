//! Consumer side of a chat turn: pump an [`EventStream`] into the engine.

use futures_util::StreamExt;
use tracing::debug;

use crate::client::{EventStream, StreamCanceller};
use crate::error::ClientError;
use crate::reconcile::{MergeStrategy, MessageUpdate, ReconciliationEngine};

/// How a turn ended. Partial content stays in the engine in every case.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(ClientError),
}

impl TurnOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::Failed(_) => "failed",
        }
    }
}

/// Apply every event of `stream` to `message_id`, calling `on_update` after
/// each one, until the stream ends, fails, or `canceller` fires.
pub async fn drive_turn<S, F>(
    mut stream: EventStream,
    canceller: &StreamCanceller,
    engine: &mut ReconciliationEngine<S>,
    message_id: &str,
    mut on_update: F,
) -> TurnOutcome
where
    S: MergeStrategy,
    F: FnMut(&MessageUpdate),
{
    loop {
        let next = tokio::select! {
            biased;
            () = canceller.cancelled() => {
                stream.cancel();
                debug!(message_id, "turn cancelled");
                return TurnOutcome::Cancelled;
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                let update = engine.apply(message_id, &event);
                on_update(&update);
            }
            Some(Err(err)) => return TurnOutcome::Failed(err),
            None if stream.is_cancelled() => return TurnOutcome::Cancelled,
            None => return TurnOutcome::Completed,
        }
    }
}
