use crate::prelude::{Burst, DeviceIndex, SpectrumFrame};
use crossbeam::queue::{ArrayQueue, SegQueue};
use crossbeam::sync::{Parker, Unparker};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Spectrum,
    Bursts,
}

/// Identity of one subscription; at most one live subscriber per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub client_id: ClientId,
    pub device_index: DeviceIndex,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Spectrum(Arc<SpectrumFrame>),
    Burst(Arc<Burst>),
}

enum Mailbox {
    /// Bounded; a full queue loses its oldest item.
    Lossy(ArrayQueue<HubEvent>),
    /// Never loses items; warns once when it grows past `soft_limit`.
    Reliable {
        queue: SegQueue<HubEvent>,
        soft_limit: usize,
        warned: AtomicBool,
    },
}

pub(crate) struct SubscriberShared {
    subscription: Subscription,
    mailbox: Mailbox,
    dropped: AtomicU64,
    closed: AtomicBool,
    unparker: Unparker,
}

impl SubscriberShared {
    pub(crate) fn subscription(&self) -> Subscription {
        self.subscription
    }

    pub(crate) fn deliver(&self, event: HubEvent) {
        match &self.mailbox {
            Mailbox::Lossy(queue) => {
                if queue.force_push(event).is_some() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Mailbox::Reliable {
                queue,
                soft_limit,
                warned,
            } => {
                queue.push(event);
                if queue.len() > *soft_limit && !warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "burst queue of client {} on device {} exceeds {} pending events",
                        self.subscription.client_id,
                        self.subscription.device_index,
                        soft_limit
                    );
                }
            }
        }
        self.unparker.unpark();
    }

    fn pop(&self) -> Option<HubEvent> {
        match &self.mailbox {
            Mailbox::Lossy(queue) => queue.pop(),
            Mailbox::Reliable { queue, .. } => queue.pop(),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        match &self.mailbox {
            Mailbox::Lossy(queue) => queue.len(),
            Mailbox::Reliable { queue, .. } => queue.len(),
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.unparker.unpark();
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscriber {
    shared: Arc<SubscriberShared>,
    parker: Parker,
}

impl Subscriber {
    pub(crate) fn new(
        subscription: Subscription,
        spectrum_depth: usize,
        burst_soft_limit: usize,
    ) -> (Self, Arc<SubscriberShared>) {
        let mailbox = match subscription.channel {
            Channel::Spectrum => Mailbox::Lossy(ArrayQueue::new(spectrum_depth.max(1))),
            Channel::Bursts => Mailbox::Reliable {
                queue: SegQueue::new(),
                soft_limit: burst_soft_limit,
                warned: AtomicBool::new(false),
            },
        };
        let parker = Parker::new();
        let shared = Arc::new(SubscriberShared {
            subscription,
            mailbox,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            unparker: parker.unparker().clone(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
                parker,
            },
            shared,
        )
    }

    pub fn subscription(&self) -> Subscription {
        self.shared.subscription
    }

    pub fn try_recv(&self) -> Option<HubEvent> {
        self.shared.pop()
    }

    /// Waits for the next event. `None` on timeout, or once the hub closed
    /// the subscription and nothing is left to read.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HubEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.shared.pop() {
                return Some(event);
            }
            if self.shared.is_closed() || Instant::now() >= deadline {
                return None;
            }
            self.parker.park_deadline(deadline);
        }
    }

    pub fn drain(&self) -> Vec<HubEvent> {
        std::iter::from_fn(|| self.shared.pop()).collect()
    }

    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Spectrum frames lost to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped()
    }

    /// True once the hub replaced or removed this subscription.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(sequence: u64) -> HubEvent {
        HubEvent::Spectrum(Arc::new(SpectrumFrame {
            device_index: 0,
            sequence,
            timestamp: Utc::now(),
            offset_s: 0.0,
            frequencies: vec![1.0],
            power_dbfs: vec![-50.0],
        }))
    }

    fn sequence_of(event: HubEvent) -> u64 {
        match event {
            HubEvent::Spectrum(frame) => frame.sequence,
            HubEvent::Burst(_) => panic!("unexpected burst"),
        }
    }

    fn spectrum_subscription() -> Subscription {
        Subscription {
            client_id: 1,
            device_index: 0,
            channel: Channel::Spectrum,
        }
    }

    #[test]
    fn full_spectrum_queue_drops_oldest() {
        let (subscriber, shared) = Subscriber::new(spectrum_subscription(), 2, 16);
        for sequence in 0..5 {
            shared.deliver(frame(sequence));
        }
        assert_eq!(subscriber.dropped(), 3);
        let kept: Vec<u64> = subscriber.drain().into_iter().map(sequence_of).collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn recv_wakes_on_delivery_from_another_thread() {
        let (subscriber, shared) = Subscriber::new(spectrum_subscription(), 4, 16);
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            shared.deliver(frame(9));
        });
        let event = subscriber.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sequence_of(event), 9);
        producer.join().unwrap();
    }

    #[test]
    fn recv_times_out_when_idle() {
        let (subscriber, _shared) = Subscriber::new(spectrum_subscription(), 4, 16);
        assert!(subscriber.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn dropping_subscriber_marks_it_closed() {
        let (subscriber, shared) = Subscriber::new(spectrum_subscription(), 4, 16);
        assert!(!shared.is_closed());
        drop(subscriber);
        assert!(shared.is_closed());
    }
}
