// Pattern store: one boolean row per channel, all rows the same length

use std::collections::HashMap;

use audio::SoundEngine;
use log::debug;
use project::model::{ChannelId, ChannelState, SoundParam, SoundParameters};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("Slot {index} out of range for {length} slots")]
    SlotOutOfRange { index: usize, length: usize },

    #[error("The main channel cannot be removed")]
    MainChannelRemoval,
}

/// A pattern row with its sound
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub row: Vec<bool>,
    pub sound: SoundParameters,
}

/// Ordered channel records (ascending id) with an id -> position index.
/// Channel 0 is always present.
#[derive(Debug, Clone)]
pub struct PatternStore {
    channels: Vec<ChannelRecord>,
    index: HashMap<ChannelId, usize>,
    length: usize,
}

impl PatternStore {
    /// Main channel only, all slots on
    pub fn new(length: usize) -> Self {
        let mut store = Self {
            channels: Vec::new(),
            index: HashMap::new(),
            length,
        };
        store.insert(ChannelRecord {
            id: ChannelId::MAIN,
            row: vec![ChannelId::MAIN.default_fill(); length],
            sound: SoundParameters::for_channel(ChannelId::MAIN),
        });
        store
    }

    /// Build from snapshot channels; rows are fitted to `length`
    pub fn from_channels(length: usize, channels: &[ChannelState]) -> Self {
        let mut store = Self::new(length);
        for channel in channels {
            let mut row = channel.pattern.clone();
            row.resize(length, channel.id.default_fill());
            store.insert(ChannelRecord {
                id: channel.id,
                row,
                sound: channel.sound,
            });
        }
        store
    }

    /// Insert or replace, keeping ascending id order
    fn insert(&mut self, record: ChannelRecord) {
        match self.channels.binary_search_by_key(&record.id, |c| c.id) {
            Ok(pos) => self.channels[pos] = record,
            Err(pos) => self.channels.insert(pos, record),
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .channels
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.id, pos))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn channels(&self) -> &[ChannelRecord] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelRecord> {
        self.index.get(&id).map(|&pos| &self.channels[pos])
    }

    fn channel_mut(&mut self, id: ChannelId) -> Result<&mut ChannelRecord, PatternError> {
        match self.index.get(&id) {
            Some(&pos) => Ok(&mut self.channels[pos]),
            None => Err(PatternError::UnknownChannel(id)),
        }
    }

    /// Sound of a channel, or the fallback sound for an unknown one
    pub fn sound(&self, id: ChannelId) -> SoundParameters {
        self.channel(id)
            .map(|c| c.sound)
            .unwrap_or_else(SoundParameters::fallback)
    }

    pub fn is_on(&self, id: ChannelId, index: usize) -> bool {
        self.channel(id)
            .and_then(|c| c.row.get(index).copied())
            .unwrap_or(false)
    }

    /// Flip one slot. Turning a slot on plays the channel's sound right away.
    pub fn toggle(
        &mut self,
        id: ChannelId,
        index: usize,
        engine: &mut dyn SoundEngine,
    ) -> Result<bool, PatternError> {
        let length = self.length;
        let channel = self.channel_mut(id)?;
        let slot = channel
            .row
            .get_mut(index)
            .ok_or(PatternError::SlotOutOfRange { index, length })?;
        *slot = !*slot;
        let now_on = *slot;

        debug!("Channel {} slot {} -> {}", id, index, if now_on { "on" } else { "off" });
        if now_on {
            engine.trigger(&channel.sound);
        }
        Ok(now_on)
    }

    /// Truncate or pad every row to `length`, padding with `default_for(id)`
    pub fn resize_with<F>(&mut self, length: usize, default_for: F)
    where
        F: Fn(ChannelId) -> bool,
    {
        for channel in &mut self.channels {
            channel.row.resize(length, default_for(channel.id));
        }
        if length != self.length {
            debug!("Pattern resized from {} to {} slots", self.length, length);
        }
        self.length = length;
    }

    /// Resize with the standard defaults: main row on, added rows off
    pub fn resize(&mut self, length: usize) {
        self.resize_with(length, ChannelId::default_fill);
    }

    /// Append a channel with id = max custom id + 1, an all-off row and the
    /// derived default sound
    pub fn add_channel(&mut self) -> ChannelId {
        let next = self
            .channels
            .iter()
            .map(|c| c.id.0)
            .filter(|&id| id > 0)
            .max()
            .unwrap_or(0)
            + 1;
        let id = ChannelId(next);
        self.insert(ChannelRecord {
            id,
            row: vec![false; self.length],
            sound: SoundParameters::for_channel(id),
        });
        debug!("Added channel {}", id);
        id
    }

    pub fn remove_channel(&mut self, id: ChannelId) -> Result<ChannelRecord, PatternError> {
        if id.is_main() {
            return Err(PatternError::MainChannelRemoval);
        }
        let pos = *self.index.get(&id).ok_or(PatternError::UnknownChannel(id))?;
        let removed = self.channels.remove(pos);
        self.reindex();
        debug!("Removed channel {}", id);
        Ok(removed)
    }

    pub fn update_sound(&mut self, id: ChannelId, update: SoundParam) -> Result<SoundParameters, PatternError> {
        let channel = self.channel_mut(id)?;
        channel.sound.apply(update);
        Ok(channel.sound)
    }

    /// The channel that sounds at `slot`.
    ///
    /// Custom channels are checked from the highest id down and shadow the
    /// main channel, which is checked last. Only the first match plays.
    pub fn resolve(&self, slot: usize) -> Option<&ChannelRecord> {
        let customs = self.channels.iter().rev().filter(|c| !c.id.is_main());
        let main = self.channels.iter().filter(|c| c.id.is_main());
        customs
            .chain(main)
            .find(|c| c.row.get(slot).copied().unwrap_or(false))
    }

    pub fn to_channel_states(&self) -> Vec<ChannelState> {
        self.channels
            .iter()
            .map(|c| ChannelState {
                id: c.id,
                pattern: c.row.clone(),
                sound: c.sound,
            })
            .collect()
    }
}
