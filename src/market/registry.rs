use crate::market::types::{Channel, ControlFrame, Subscription};
use std::collections::BTreeSet;

/// Outbound subscribe/unsubscribe bookkeeping for one connected session.
///
/// Desired state lives in the client preferences; the registry only keeps the
/// session from sending duplicate control frames. It is cleared whenever the
/// transport goes away.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: BTreeSet<Subscription>,
}

impl SubscriptionRegistry {
    /// Records the pair; a frame is produced only for a new pair on a live session.
    pub fn subscribe(&mut self, subscription: Subscription, connected: bool) -> Option<ControlFrame> {
        if self.active.contains(&subscription) {
            return None;
        }
        let frame = connected.then(|| ControlFrame::subscribe(&subscription));
        self.active.insert(subscription);
        frame
    }

    pub fn unsubscribe(
        &mut self,
        subscription: &Subscription,
        connected: bool,
    ) -> Option<ControlFrame> {
        if !self.active.remove(subscription) {
            return None;
        }
        connected.then(|| ControlFrame::unsubscribe(subscription))
    }

    /// Moves the registry to `desired`: stale pairs first, then new ones in order.
    pub fn reconcile(&mut self, desired: &[Subscription], connected: bool) -> Vec<ControlFrame> {
        let stale: Vec<Subscription> = self
            .active
            .iter()
            .filter(|subscription| !desired.contains(subscription))
            .cloned()
            .collect();

        let mut frames = Vec::new();
        for subscription in &stale {
            frames.extend(self.unsubscribe(subscription, connected));
        }
        for subscription in desired {
            frames.extend(self.subscribe(subscription.clone(), connected));
        }
        frames
    }

    pub fn symbols_on(&self, channel: Channel) -> Vec<String> {
        self.active
            .iter()
            .filter(|subscription| subscription.channel == channel)
            .map(|subscription| subscription.symbol.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.active.contains(subscription)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
