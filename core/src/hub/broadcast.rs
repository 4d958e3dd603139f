use crate::hub::subscription::{
    Channel, ClientId, HubEvent, Subscriber, SubscriberShared, Subscription,
};
use crate::hub::waterfall::WaterfallHistory;
use crate::prelude::{Burst, DeviceIndex, SpectrumFrame};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Spectrum frames buffered per subscriber before the oldest is dropped.
    pub spectrum_queue_depth: usize,
    /// Pending burst events per subscriber above which a warning is logged.
    pub burst_queue_limit: usize,
    /// Frames retained per device for late joiners.
    pub history_frames: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            spectrum_queue_depth: 32,
            burst_queue_limit: 4096,
            history_frames: 100,
        }
    }
}

/// Queue state of one live subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStats {
    pub subscription: Subscription,
    pub pending: usize,
    pub dropped: u64,
}

struct DeviceGroup {
    subscribers: RwLock<Vec<Arc<SubscriberShared>>>,
    history: Mutex<WaterfallHistory<Arc<SpectrumFrame>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-device fan-out of spectrum frames and burst events.
///
/// Publishing never blocks on a subscriber: spectrum queues are bounded and
/// lose their oldest frame when full, burst queues are unbounded.
pub struct SubscriptionHub {
    config: HubConfig,
    groups: RwLock<HashMap<DeviceIndex, Arc<DeviceGroup>>>,
    next_client: AtomicU64,
}

impl SubscriptionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            groups: RwLock::new(HashMap::new()),
            next_client: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Fresh client identity for callers that do not bring their own.
    pub fn next_client_id(&self) -> ClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    fn group(&self, device_index: DeviceIndex) -> Arc<DeviceGroup> {
        if let Some(group) = read(&self.groups).get(&device_index) {
            return Arc::clone(group);
        }
        let mut groups = write(&self.groups);
        Arc::clone(groups.entry(device_index).or_insert_with(|| {
            Arc::new(DeviceGroup {
                subscribers: RwLock::new(Vec::new()),
                history: Mutex::new(WaterfallHistory::new(self.config.history_frames)),
            })
        }))
    }

    fn existing_group(&self, device_index: DeviceIndex) -> Option<Arc<DeviceGroup>> {
        read(&self.groups).get(&device_index).cloned()
    }

    /// Registers a subscriber; an existing subscription with the same
    /// identity is closed and replaced.
    pub fn subscribe(
        &self,
        client_id: ClientId,
        device_index: DeviceIndex,
        channel: Channel,
    ) -> Subscriber {
        let subscription = Subscription {
            client_id,
            device_index,
            channel,
        };
        let (subscriber, shared) = Subscriber::new(
            subscription,
            self.config.spectrum_queue_depth,
            self.config.burst_queue_limit,
        );

        let group = self.group(device_index);
        let mut subscribers = write(&group.subscribers);
        subscribers.retain(|existing| {
            let replaced = existing.subscription() == subscription;
            if replaced {
                existing.close();
            }
            !replaced && !existing.is_closed()
        });
        subscribers.push(shared);
        log::debug!(
            "client {} subscribed to {:?} of device {}",
            client_id,
            channel,
            device_index
        );
        subscriber
    }

    /// Removes one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let Some(group) = self.existing_group(subscription.device_index) else {
            return false;
        };
        let mut subscribers = write(&group.subscribers);
        let before = subscribers.len();
        subscribers.retain(|existing| {
            if existing.subscription() == *subscription {
                existing.close();
                false
            } else {
                true
            }
        });
        before != subscribers.len()
    }

    /// Removes every subscription held by `client_id` and returns how many.
    pub fn disconnect(&self, client_id: ClientId) -> usize {
        let groups: Vec<Arc<DeviceGroup>> = read(&self.groups).values().cloned().collect();
        let mut removed = 0;
        for group in groups {
            let mut subscribers = write(&group.subscribers);
            subscribers.retain(|existing| {
                if existing.subscription().client_id == client_id {
                    existing.close();
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    fn fan_out(&self, group: &DeviceGroup, channel: Channel, event: HubEvent) {
        let mut saw_closed = false;
        {
            let subscribers = read(&group.subscribers);
            for subscriber in subscribers.iter() {
                if subscriber.is_closed() {
                    saw_closed = true;
                } else if subscriber.subscription().channel == channel {
                    subscriber.deliver(event.clone());
                }
            }
        }
        if saw_closed {
            write(&group.subscribers).retain(|subscriber| !subscriber.is_closed());
        }
    }

    /// Records `frame` in the device's waterfall and offers it to every
    /// spectrum subscriber of that device.
    pub fn publish_spectrum(&self, frame: Arc<SpectrumFrame>) {
        let group = self.group(frame.device_index);
        lock(&group.history).push(Arc::clone(&frame));
        self.fan_out(&group, Channel::Spectrum, HubEvent::Spectrum(frame));
    }

    pub fn publish_burst(&self, burst: Arc<Burst>) {
        if let Some(group) = self.existing_group(burst.device_id) {
            self.fan_out(&group, Channel::Bursts, HubEvent::Burst(burst));
        }
    }

    /// Retained frames of one device, oldest first.
    pub fn waterfall(&self, device_index: DeviceIndex) -> Vec<Arc<SpectrumFrame>> {
        self.existing_group(device_index)
            .map(|group| lock(&group.history).snapshot())
            .unwrap_or_default()
    }

    pub fn clear_waterfall(&self, device_index: DeviceIndex) {
        if let Some(group) = self.existing_group(device_index) {
            lock(&group.history).clear();
        }
    }

    pub fn subscriptions(&self, device_index: DeviceIndex) -> Vec<SubscriptionStats> {
        self.existing_group(device_index)
            .map(|group| {
                read(&group.subscribers)
                    .iter()
                    .filter(|subscriber| !subscriber.is_closed())
                    .map(|subscriber| SubscriptionStats {
                        subscription: subscriber.subscription(),
                        pending: subscriber.pending(),
                        dropped: subscriber.dropped(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn frame(device_index: DeviceIndex, sequence: u64) -> Arc<SpectrumFrame> {
        Arc::new(SpectrumFrame {
            device_index,
            sequence,
            timestamp: Utc::now(),
            offset_s: sequence as f64 * 0.005,
            frequencies: vec![1.0, 2.0],
            power_dbfs: vec![-60.0, -61.0],
        })
    }

    fn burst(device_id: DeviceIndex) -> Arc<Burst> {
        Arc::new(Burst {
            id: Uuid::new_v4(),
            device_id,
            frequency_hz: 433_920_000.0,
            peak_power_dbfs: -30.0,
            timestamp: Utc::now(),
            duration_s: 0.2,
            bandwidth_hz: 2_000.0,
            capture_ref: None,
        })
    }

    fn sequences(events: Vec<HubEvent>) -> Vec<u64> {
        events
            .into_iter()
            .filter_map(|event| match event {
                HubEvent::Spectrum(frame) => Some(frame.sequence),
                HubEvent::Burst(_) => None,
            })
            .collect()
    }

    fn small_hub() -> SubscriptionHub {
        SubscriptionHub::new(HubConfig {
            spectrum_queue_depth: 4,
            burst_queue_limit: 8,
            history_frames: 5,
        })
    }

    #[test]
    fn slow_subscriber_sees_a_suffix_without_stalling_others() {
        let hub = small_hub();
        let slow = hub.subscribe(1, 0, Channel::Spectrum);
        let fast = hub.subscribe(2, 0, Channel::Spectrum);

        let mut fast_seen = Vec::new();
        let started = Instant::now();
        for sequence in 0..100 {
            hub.publish_spectrum(frame(0, sequence));
            fast_seen.extend(sequences(fast.drain()));
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(fast_seen, (0..100).collect::<Vec<_>>());
        assert_eq!(fast.dropped(), 0);
        assert_eq!(sequences(slow.drain()), vec![96, 97, 98, 99]);
        assert_eq!(slow.dropped(), 96);
    }

    #[test]
    fn burst_events_are_never_dropped() {
        let hub = small_hub();
        let listener = hub.subscribe(1, 0, Channel::Bursts);
        for _ in 0..50 {
            hub.publish_burst(burst(0));
            hub.publish_spectrum(frame(0, 0));
        }
        let events = listener.drain();
        assert_eq!(events.len(), 50);
        assert!(events.iter().all(|e| matches!(e, HubEvent::Burst(_))));
        assert_eq!(listener.dropped(), 0);
    }

    #[test]
    fn devices_are_isolated() {
        let hub = small_hub();
        let zero = hub.subscribe(1, 0, Channel::Spectrum);
        let one = hub.subscribe(1, 1, Channel::Spectrum);
        hub.publish_spectrum(frame(1, 7));
        assert!(zero.try_recv().is_none());
        assert_eq!(sequences(one.drain()), vec![7]);
    }

    #[test]
    fn waterfall_keeps_latest_frames_for_late_joiners() {
        let hub = small_hub();
        for sequence in 0..8 {
            hub.publish_spectrum(frame(3, sequence));
        }
        let history: Vec<u64> = hub.waterfall(3).iter().map(|f| f.sequence).collect();
        assert_eq!(history, vec![3, 4, 5, 6, 7]);
        assert!(hub.waterfall(4).is_empty());
        hub.clear_waterfall(3);
        assert!(hub.waterfall(3).is_empty());
    }

    #[test]
    fn resubscribing_replaces_previous_subscriber() {
        let hub = small_hub();
        let first = hub.subscribe(5, 0, Channel::Spectrum);
        let second = hub.subscribe(5, 0, Channel::Spectrum);
        assert!(first.is_closed());
        hub.publish_spectrum(frame(0, 1));
        assert!(first.try_recv().is_none());
        assert_eq!(sequences(second.drain()), vec![1]);
        assert_eq!(hub.subscriptions(0).len(), 1);
    }

    #[test]
    fn unsubscribe_and_disconnect_remove_subscriptions() {
        let hub = small_hub();
        let spectrum = hub.subscribe(9, 0, Channel::Spectrum);
        let _bursts = hub.subscribe(9, 1, Channel::Bursts);
        let _other = hub.subscribe(10, 0, Channel::Bursts);

        assert!(hub.unsubscribe(&spectrum.subscription()));
        assert!(!hub.unsubscribe(&spectrum.subscription()));
        assert_eq!(hub.disconnect(9), 1);
        assert_eq!(hub.subscriptions(0).len(), 1);
        assert!(hub.subscriptions(1).is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let hub = small_hub();
        let subscriber = hub.subscribe(1, 0, Channel::Spectrum);
        drop(subscriber);
        hub.publish_spectrum(frame(0, 0));
        assert!(hub.subscriptions(0).is_empty());
    }
}
