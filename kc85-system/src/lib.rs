// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod bus;
mod config;
mod expansion;
mod frame_buffer;
mod kc85;
mod video;

pub use self::bus::{
    Bus, IO84_HICOLOR, IO84_SEL_CPU_COLOR, IO84_SEL_CPU_IMG, IO84_SEL_RAM8, IO84_SEL_VIEW_IMG,
    IO86_CAOS_ROM_C, IO86_RAM4, IO86_RAM4_RW, PIO_A_BASIC_ROM, PIO_A_CAOS_ROM, PIO_A_IRM,
    PIO_A_RAM, PIO_A_RAM_RW, PIO_B_BLINK_ENABLED, PIO_B_RAM8, PIO_B_RAM8_RW, PIO_B_VOLUME_MASK,
};
pub use self::config::{BuildError, Config, Roms, SoundConfig, SystemModel, Variant};
pub use self::expansion::{Expansion, Module, ModuleError, ModuleType, SLOT_LEFT, SLOT_RIGHT};
pub use self::frame_buffer::{FrameBuffer, DISPLAY_HEIGHT, DISPLAY_WIDTH};
pub use self::kc85::{Kc85, PatchFn};
pub use self::video::{BACKGROUND_PALETTE, FOREGROUND_PALETTE};

/// A mountable program image produced by a snapshot loader.
pub trait Image {
    fn mount(&mut self, kc85: &mut Kc85);
}
