use std::{
    collections::{HashSet, VecDeque},
    net::SocketAddr,
};

use crate::rendezvous::RoomId;

/// Set of player ids known to be connected, one bit per possible id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerSet([u64; 4]);

impl PlayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the player was not in the set.
    pub fn insert(&mut self, player_id: u8) -> bool {
        let (word, bit) = Self::position(player_id);
        let absent = self.0[word] & bit == 0;
        self.0[word] |= bit;
        absent
    }

    /// Returns `true` if the player was in the set.
    pub fn remove(&mut self, player_id: u8) -> bool {
        let (word, bit) = Self::position(player_id);
        let present = self.0[word] & bit != 0;
        self.0[word] &= !bit;
        present
    }

    pub fn contains(&self, player_id: u8) -> bool {
        let (word, bit) = Self::position(player_id);
        self.0[word] & bit != 0
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    pub fn clear(&mut self) {
        self.0 = [0; 4];
    }

    /// Iterates the player ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |player_id| self.contains(*player_id))
    }

    #[inline]
    fn position(player_id: u8) -> (usize, u64) {
        ((player_id / 64) as usize, 1 << (player_id % 64))
    }
}

/// Host side bookkeeping: which address owns each player slot.
///
/// Slot `i` of the table is player id `i + 1`, the host is always player 0.
///
/// Rejected peers are connected one at a time: `to_reject` holds the ones with a
/// connection in flight, at most one, the others wait in `queued_rejections`.
#[derive(Debug)]
pub(crate) struct HostPeers {
    started: bool,
    slots: Box<[Option<SocketAddr>]>,
    to_reject: HashSet<SocketAddr>,
    queued_rejections: VecDeque<SocketAddr>,
}

impl HostPeers {
    /// `capacity` counts the host, so the table has `capacity - 1` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            started: false,
            slots: vec![None; capacity.saturating_sub(1)].into_boxed_slice(),
            to_reject: HashSet::new(),
            queued_rejections: VecDeque::new(),
        }
    }

    /// Room capacity, host included.
    pub fn capacity(&self) -> usize {
        self.slots.len() + 1
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn player_id(&self, addr: SocketAddr) -> Option<u8> {
        self.slots
            .iter()
            .position(|slot| *slot == Some(addr))
            .map(|index| index as u8 + 1)
    }

    pub fn addr(&self, player_id: u8) -> Option<SocketAddr> {
        let index = (player_id as usize).checked_sub(1)?;
        self.slots.get(index).copied().flatten()
    }

    /// Puts `addr` in the first empty slot, returning its player id.
    pub fn reserve(&mut self, addr: SocketAddr) -> Option<u8> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(addr);
        Some(index as u8 + 1)
    }

    /// Empties the slot held by `addr`, returning its player id.
    pub fn release(&mut self, addr: SocketAddr) -> Option<u8> {
        let player_id = self.player_id(addr)?;
        self.slots[player_id as usize - 1] = None;
        Some(player_id)
    }

    /// Iterates every reserved slot as `(player_id, addr)`.
    pub fn peers(&self) -> impl Iterator<Item = (u8, SocketAddr)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|addr| (index as u8 + 1, addr)))
    }

    /// Marks `addr` for rejection, returning `true` if it should be connected right away.
    pub fn reject(&mut self, addr: SocketAddr) -> bool {
        if self.to_reject.contains(&addr) || self.queued_rejections.contains(&addr) {
            return false;
        }
        if self.to_reject.is_empty() {
            self.to_reject.insert(addr);
            return true;
        }

        self.queued_rejections.push_back(addr);
        false
    }

    /// Returns `true` if the address had a rejection connection in flight.
    pub fn remove_rejection(&mut self, addr: SocketAddr) -> bool {
        self.queued_rejections.retain(|queued| *queued != addr);
        self.to_reject.remove(&addr)
    }

    /// Moves the next queued rejection in flight once the previous one is done.
    pub fn next_rejection(&mut self) -> Option<SocketAddr> {
        if !self.to_reject.is_empty() {
            return None;
        }
        let addr = self.queued_rejections.pop_front()?;
        self.to_reject.insert(addr);
        Some(addr)
    }
}

/// Client side bookkeeping: the host address once punch-through succeeded.
#[derive(Debug)]
pub(crate) struct ClientPeer {
    pub host_addr: Option<SocketAddr>,
    pub room: RoomId,
    pub started: bool,
}

impl ClientPeer {
    pub fn new(room: RoomId) -> Self {
        Self {
            host_addr: None,
            room,
            started: false,
        }
    }

    pub fn is_host(&self, addr: SocketAddr) -> bool {
        self.host_addr == Some(addr)
    }
}
