//! Audio-ingest stage: client audio in, transcript events out.

use super::{forward, recv_or_cancel};
use crate::{
    cleanup::StageHandle,
    event::VoiceAgentEvent,
    session::{CloseReason, Session},
    stt::{Recognition, RecognitionStream, SttSender},
};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(super) type SttHandle = StageHandle<Box<dyn SttSender>>;

/// Forwards client audio to the recognizer until the audio ends or the
/// session is cancelled, then finalizes and closes the recognizer.
///
/// Send failures mark the recognizer degraded; later chunks are dropped but
/// the audio is still drained so the end of input is observed.
pub(super) async fn forward_audio(
    handle: Arc<SttHandle>,
    mut audio: BoxStream<'static, Bytes>,
    session: Arc<Session>,
) {
    let cancel = session.cancellation();
    let mut forwarded = 0usize;

    loop {
        let Some(chunk) = recv_or_cancel(&cancel, audio.next()).await else {
            break;
        };
        let Some(chunk) = chunk else {
            info!(forwarded, "Client audio ended. Finalizing recognizer.");
            handle.close().await;
            session.close(CloseReason::InputEnded);
            return;
        };

        if !handle.is_connected() {
            continue;
        }
        let Some(mut sender) = handle.lock().await else {
            continue;
        };
        let Some(sent) = recv_or_cancel(&cancel, sender.send_audio(chunk)).await else {
            break;
        };
        drop(sender);

        match sent {
            Ok(()) => forwarded += 1,
            Err(e) => {
                warn!(error = ?e, "Failed to send audio to recognizer.");
                handle.mark_degraded();
            }
        }
    }

    debug!(forwarded, "Audio forwarding cancelled.");
    handle.close().await;
}

/// Translates recognizer results into `SttChunk` / `SttFinal` events.
pub(super) async fn relay_transcripts(
    handle: Arc<SttHandle>,
    mut recognitions: RecognitionStream,
    out: mpsc::Sender<VoiceAgentEvent>,
    session: Arc<Session>,
) {
    let cancel = session.cancellation();

    while let Some(next) = recv_or_cancel(&cancel, recognitions.next()).await {
        let event = match next {
            Some(Ok(Recognition::Partial(text))) => VoiceAgentEvent::SttChunk { text },
            Some(Ok(Recognition::Final(text))) if text.trim().is_empty() => {
                debug!("Skipping empty final transcript.");
                continue;
            }
            Some(Ok(Recognition::Final(text))) => {
                info!(transcript = %text, "Final transcript.");
                VoiceAgentEvent::SttFinal { text }
            }
            Some(Ok(Recognition::End)) | None => {
                info!("Recognizer finished.");
                break;
            }
            Some(Err(e)) => {
                warn!(error = ?e, "Failed to receive from recognizer.");
                handle.mark_degraded();
                break;
            }
        };
        if !forward(&out, event, &cancel).await {
            break;
        }
    }
}
