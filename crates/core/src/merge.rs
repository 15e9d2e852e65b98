//! Fan-in of independently progressing event streams.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Merges several streams into one.
///
/// Every item of every input is yielded exactly once and each input's own
/// order is preserved. When several inputs are ready at the same time the one
/// registered first wins, so a producer whose events causally precede another
/// producer's events (pass-through before synthesized audio) must be listed
/// first. Later inputs therefore yield to earlier ones: steady pass-through
/// traffic delays synthesized audio until the pass-through input goes idle.
/// The merged stream ends when every input has ended or the token is
/// cancelled.
pub struct FanIn<S> {
    inputs: Vec<S>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> FanIn<S>
where
    S: Stream + Unpin,
{
    pub fn new(inputs: impl IntoIterator<Item = S>, cancel: CancellationToken) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            cancelled: Box::pin(cancel.cancelled_owned()),
        }
    }

    /// Number of inputs that have not ended yet.
    pub fn live_inputs(&self) -> usize {
        self.inputs.len()
    }
}

impl<S> Stream for FanIn<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.inputs.clear();
            return Poll::Ready(None);
        }

        let mut index = 0;
        while index < this.inputs.len() {
            match this.inputs[index].poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                // Keep the remaining inputs in registration order.
                Poll::Ready(None) => {
                    this.inputs.remove(index);
                }
                Poll::Pending => index += 1,
            }
        }

        if this.inputs.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Shorthand for [`FanIn::new`].
pub fn fan_in<S>(inputs: impl IntoIterator<Item = S>, cancel: CancellationToken) -> FanIn<S>
where
    S: Stream + Unpin,
{
    FanIn::new(inputs, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test]
    async fn yields_every_item_and_keeps_per_source_order() {
        let left = stream::iter(vec!["he", "hello", "hello."]);
        let right = stream::iter(vec!["a1", "a2"]);
        let merged: Vec<_> = fan_in(vec![left.boxed(), right.boxed()], CancellationToken::new())
            .collect()
            .await;

        assert_eq!(merged.len(), 5);
        let lefts: Vec<_> = merged.iter().filter(|s| s.starts_with('h')).collect();
        let rights: Vec<_> = merged.iter().filter(|s| s.starts_with('a')).collect();
        assert_eq!(lefts, vec![&"he", &"hello", &"hello."]);
        assert_eq!(rights, vec![&"a1", &"a2"]);
    }

    #[tokio::test]
    async fn first_input_wins_when_both_are_ready() {
        let (pass_tx, pass_rx) = mpsc::channel(8);
        let (audio_tx, audio_rx) = mpsc::channel(8);
        pass_tx.send("agent_end").await.unwrap();
        audio_tx.send("audio").await.unwrap();

        let mut merged = fan_in(
            vec![ReceiverStream::new(pass_rx), ReceiverStream::new(audio_rx)],
            CancellationToken::new(),
        );
        assert_eq!(merged.next().await, Some("agent_end"));
        assert_eq!(merged.next().await, Some("audio"));
    }

    #[tokio::test]
    async fn audio_waits_while_pass_through_is_busy() {
        let pass = stream::iter(vec!["p1", "p2", "p3"]);
        let audio = stream::iter(vec!["a1"]);
        let merged: Vec<_> = fan_in(vec![pass.boxed(), audio.boxed()], CancellationToken::new())
            .collect()
            .await;

        assert_eq!(merged, vec!["p1", "p2", "p3", "a1"]);
    }

    #[tokio::test]
    async fn keeps_draining_after_one_input_ends() {
        let (early_tx, early_rx) = mpsc::channel(8);
        let (late_tx, late_rx) = mpsc::channel(8);
        let mut merged = fan_in(
            vec![ReceiverStream::new(early_rx), ReceiverStream::new(late_rx)],
            CancellationToken::new(),
        );

        early_tx.send(1).await.unwrap();
        drop(early_tx);
        assert_eq!(merged.next().await, Some(1));

        late_tx.send(2).await.unwrap();
        assert_eq!(merged.next().await, Some(2));
        assert_eq!(merged.live_inputs(), 1);

        drop(late_tx);
        assert_eq!(merged.next().await, None);
        assert_eq!(merged.live_inputs(), 0);
    }

    #[tokio::test]
    async fn cancellation_ends_the_merge() {
        let (_tx, rx) = mpsc::channel::<u8>(8);
        let cancel = CancellationToken::new();
        let mut merged = fan_in(vec![ReceiverStream::new(rx)], cancel.clone());

        cancel.cancel();
        assert_eq!(merged.next().await, None);
    }

    #[tokio::test]
    async fn no_inputs_ends_immediately() {
        let mut merged = fan_in(Vec::<ReceiverStream<u8>>::new(), CancellationToken::new());
        assert_eq!(merged.next().await, None);
    }
}
