//! ChannelPool: one voice per MIDI channel, oldest-first stealing.

use crate::sink::VoiceId;

/// An occupied channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledVoice<T> {
    pub id: VoiceId,
    pub channel: u8,
    /// Allocation order, increasing across the run.
    pub started: u64,
    pub data: T,
}

/// Result of [`ChannelPool::allocate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation<T> {
    pub id: VoiceId,
    pub channel: u8,
    /// The voice that had to give up its channel, if the pool was full.
    /// The caller must send its note-off before using the channel.
    pub evicted: Option<PooledVoice<T>>,
}

/// Fixed set of channels, each holding at most one voice.
///
/// Voice ids are never reused, so releasing an evicted voice's id later is a
/// no-op rather than cutting off whoever took its channel.
#[derive(Debug)]
pub struct ChannelPool<T> {
    channels: Vec<u8>,
    slots: Vec<Option<PooledVoice<T>>>,
    next_id: VoiceId,
    next_start: u64,
}

impl<T> ChannelPool<T> {
    pub fn new(channels: impl IntoIterator<Item = u8>) -> Self {
        let channels: Vec<u8> = channels.into_iter().collect();
        let slots = channels.iter().map(|_| None).collect();
        Self {
            channels,
            slots,
            next_id: 1,
            next_start: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    /// Claim a channel: the first free one, else the oldest voice's.
    /// Returns `None` only for an empty pool.
    pub fn allocate(&mut self, data: T) -> Option<Allocation<T>> {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => self.oldest()?,
        };

        let id = self.next_id;
        self.next_id += 1;
        let started = self.next_start;
        self.next_start += 1;

        let channel = self.channels[slot];
        let evicted = self.slots[slot].replace(PooledVoice {
            id,
            channel,
            started,
            data,
        });

        Some(Allocation {
            id,
            channel,
            evicted,
        })
    }

    fn oldest(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v.started)))
            .min_by_key(|(_, started)| *started)
            .map(|(i, _)| i)
    }

    fn slot_of(&self, id: VoiceId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|v| v.id == id))
    }

    pub fn get(&self, id: VoiceId) -> Option<&PooledVoice<T>> {
        self.slot_of(id).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, id: VoiceId) -> Option<&mut PooledVoice<T>> {
        let slot = self.slot_of(id)?;
        self.slots[slot].as_mut()
    }

    /// Free the voice's channel. Stale ids return `None`.
    pub fn release(&mut self, id: VoiceId) -> Option<PooledVoice<T>> {
        let slot = self.slot_of(id)?;
        self.slots[slot].take()
    }

    /// Free every channel, yielding the voices that held them.
    pub fn drain(&mut self) -> impl Iterator<Item = PooledVoice<T>> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_cannot_allocate() {
        let mut pool: ChannelPool<()> = ChannelPool::new(Vec::new());
        assert!(pool.allocate(()).is_none());
    }

    #[test]
    fn allocates_lowest_free_channel() {
        let mut pool = ChannelPool::new(1..4);
        let a = pool.allocate('a').unwrap();
        let b = pool.allocate('b').unwrap();
        assert_eq!((a.channel, b.channel), (1, 2));

        pool.release(a.id);
        let c = pool.allocate('c').unwrap();
        assert_eq!(c.channel, 1);
        assert!(c.evicted.is_none());
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn seventeenth_note_steals_the_oldest_channel() {
        let mut pool = ChannelPool::new(0..16);
        let allocations: Vec<_> = (0..16u8).map(|n| pool.allocate(n).unwrap()).collect();
        assert!(allocations.iter().all(|a| a.evicted.is_none()));

        let extra = pool.allocate(99).unwrap();
        let evicted = extra.evicted.expect("pool was full");
        assert_eq!(evicted.id, allocations[0].id);
        assert_eq!(evicted.data, 0);
        assert_eq!(extra.channel, allocations[0].channel);
        assert_eq!(pool.active_count(), 16);
    }

    #[test]
    fn stealing_follows_start_order_not_channel_order() {
        let mut pool = ChannelPool::new(0..3);
        let a = pool.allocate("a").unwrap();
        let b = pool.allocate("b").unwrap();
        pool.allocate("c").unwrap();

        // Channel 0 is reused, so "b" on channel 1 becomes the oldest
        pool.release(a.id);
        pool.allocate("d").unwrap();

        let e = pool.allocate("e").unwrap();
        assert_eq!(e.evicted.map(|v| v.id), Some(b.id));
        assert_eq!(e.channel, 1);
    }

    #[test]
    fn stale_release_is_a_no_op() {
        let mut pool = ChannelPool::new(0..1);
        let first = pool.allocate(1).unwrap();
        let second = pool.allocate(2).unwrap();
        assert_eq!(second.evicted.map(|v| v.id), Some(first.id));

        assert!(pool.release(first.id).is_none());
        assert_eq!(pool.get(second.id).map(|v| v.data), Some(2));
    }

    #[test]
    fn drain_frees_everything() {
        let mut pool = ChannelPool::new(0..4);
        pool.allocate(()).unwrap();
        pool.allocate(()).unwrap();
        let drained: Vec<_> = pool.drain().map(|v| v.channel).collect();
        assert_eq!(drained, vec![0, 1]);
        assert_eq!(pool.active_count(), 0);
    }
}
