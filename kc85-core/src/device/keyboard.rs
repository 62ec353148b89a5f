// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Design:
//   The operating system polls for key state only a few times per frame, so
//   a key press from the host must outlive the host's own key-repeat timing
//   to be noticed reliably. Pressed keys are therefore kept in a small
//   buffer for at least a sticky duration after release. Time is an
//   internal wrapping microsecond counter advanced once per host frame;
//   comparisons use wrapping arithmetic so the counter may roll over.

const NUM_SLOTS: usize = 8;

#[derive(Clone, Copy)]
struct KeySlot {
    key: u8,
    pressed_time: u32,
    released: bool,
}

impl KeySlot {
    fn empty() -> Self {
        Self {
            key: 0,
            pressed_time: 0,
            released: false,
        }
    }
}

pub struct KeyBuffer {
    slots: [KeySlot; NUM_SLOTS],
    sticky_us: u32,
    time_us: u32,
}

impl KeyBuffer {
    pub fn new(sticky_us: u32) -> Self {
        Self {
            slots: [KeySlot::empty(); NUM_SLOTS],
            sticky_us,
            time_us: 0,
        }
    }

    pub fn reset(&mut self) {
        self.slots = [KeySlot::empty(); NUM_SLOTS];
    }

    /// Advance the internal clock by one host frame and expire released
    /// keys whose sticky window has elapsed.
    pub fn update(&mut self, frame_us: u32) {
        self.time_us = self.time_us.wrapping_add(frame_us);
        for slot in self.slots.iter_mut() {
            if slot.key != 0
                && slot.released
                && self.time_us.wrapping_sub(slot.pressed_time) >= self.sticky_us
            {
                *slot = KeySlot::empty();
            }
        }
    }

    pub fn key_down(&mut self, key: u8) {
        if key == 0 {
            return;
        }
        for slot in self.slots.iter_mut() {
            if slot.key == key {
                slot.pressed_time = self.time_us;
                slot.released = false;
                return;
            }
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == 0) {
            slot.key = key;
            slot.pressed_time = self.time_us;
            slot.released = false;
        }
    }

    pub fn key_up(&mut self, key: u8) {
        for slot in self.slots.iter_mut() {
            if slot.key == key {
                slot.released = true;
            }
        }
    }

    /// The key with the most recent press time, or 0 when no key is held.
    pub fn most_recent_key(&self) -> u8 {
        let mut best_key = 0;
        let mut best_age = u32::max_value();
        for slot in self.slots.iter() {
            if slot.key != 0 {
                let age = self.time_us.wrapping_sub(slot.pressed_time);
                if age < best_age {
                    best_age = age;
                    best_key = slot.key;
                }
            }
        }
        best_key
    }
}
