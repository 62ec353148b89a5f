// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

/// A tick represents a callback invoked by the cpu for each machine cycle
/// during instruction execution. It receives the number of clock cycles in
/// the machine cycle and the current pin bus word, and returns the updated
/// pin bus word (possibly with data and wait-state bits injected).
pub type TickFn = Rc<dyn Fn(u32, u64) -> u64>;

pub fn make_noop() -> TickFn {
    Rc::new(|_, pins| pins)
}

/// A chip represents an I/O device attached to the shared cpu pin bus.
pub trait Chip {
    /// Handle an I/O request machine cycle addressed to this chip.
    fn iorq(&mut self, pins: u64) -> u64;
    /// Emulate one clock cycle of the chip.
    fn tick(&mut self, pins: u64) -> u64;
    /// Drive the interrupt daisy chain section owned by this chip.
    fn int(&mut self, pins: u64) -> u64;
    /// Handle reset signal.
    fn reset(&mut self);
}

/// Video output used by the display decoder.
pub trait VideoOutput {
    /// Reset output.
    fn reset(&mut self);
    /// Write an ARGB pixel at index = y * pitch + x.
    fn write(&mut self, index: usize, color: u32);
}

/// Sound output used by the audio pipeline.
pub trait SoundOutput {
    /// Reset output.
    fn reset(&self);
    /// Write a batch of generated samples to the output.
    fn write(&self, samples: &[f32]);
}
