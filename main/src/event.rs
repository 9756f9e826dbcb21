use crate::agent::GatherError;
use crate::candidate::Candidate;
use futures_channel::mpsc::UnboundedReceiver;
use futures_channel::mpsc::UnboundedSender;
use futures_util::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::task::Context;
use std::task::Poll;

/// Progress of a gathering pass, in discovery order.
///
/// Every pass ends with exactly one terminal event: [`CandidateEvent::Completed`] or
/// [`CandidateEvent::Failed`].
#[derive(Debug, Clone)]
pub enum CandidateEvent {
    Discovered(Candidate),
    Completed,
    Failed(GatherError),
}

impl CandidateEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Discovered(_))
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Discovered(c) => Some(c),
            _ => None,
        }
    }
}

/// Fans out candidate events to any number of independent subscribers.
///
/// Channels are unbounded so a slow subscriber never holds up gathering.
#[derive(Default)]
pub struct CandidateEventBus {
    subscribers: Mutex<Vec<UnboundedSender<CandidateEvent>>>,
}

impl CandidateEventBus {
    pub fn subscribe(&self) -> CandidateStream {
        let (sender, receiver) = futures_channel::mpsc::unbounded();
        self.lock().push(sender);
        CandidateStream { receiver }
    }

    pub fn publish(&self, event: CandidateEvent) {
        self.lock()
            .retain(|s| s.unbounded_send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.is_closed());
        subscribers.len()
    }

    /// Ends every subscription. Events already queued are still delivered.
    pub fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UnboundedSender<CandidateEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A subscription to a [`CandidateEventBus`]. Dropping it unsubscribes.
pub struct CandidateStream {
    receiver: UnboundedReceiver<CandidateEvent>,
}

impl Stream for CandidateStream {
    type Item = CandidateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = CandidateEventBus::default();
        let first = bus.subscribe();
        let second = bus.subscribe();

        // When
        bus.publish(CandidateEvent::Completed);
        bus.close();

        // Then
        for stream in [first, second] {
            let events: Vec<_> = stream.collect().await;
            assert_eq!(events.len(), 1);
            assert!(events[0].is_terminal());
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = CandidateEventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        // When
        bus.publish(CandidateEvent::Completed);

        // Then
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = CandidateEventBus::default();
        bus.publish(CandidateEvent::Completed);

        // When
        let stream = bus.subscribe();
        bus.close();

        // Then
        assert_eq!(stream.count().await, 0);
    }
}
