// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::sync::Arc;

use kc85_core::clock::Clock;
use kc85_core::cpu::Z80;
use kc85_core::device::KeyBuffer;
use kc85_core::factory::{SoundOutput, TickFn};
use kc85_core::mem::{Memory, Rom};
use kc85_core::util::{new_shared, Shared};

use crate::bus::Bus;
use crate::config::{BuildError, Config, Variant};
use crate::expansion::{ModuleError, ModuleType};
use crate::frame_buffer::FrameBuffer;

// Design:
//   Kc85 represents the machine itself. The cpu drives the shared bus
//   through the tick callback once per machine cycle; everything else
//   (host frame pacing, keyboard, snapshot mounting) happens between
//   exec calls when the bus is quiescent.

/// Released keys stay visible to the OS poll loop for this long.
const KEY_STICKY_US: u32 = 33_300;

// CAOS keyboard state, relative to the IX work area
const KBD_STATUS: u16 = 0x08;
const KBD_REPEAT_COUNT: u16 = 0x0a;
const KBD_KEY: u16 = 0x0d;
const KBD_TIMEOUT_BIT: u8 = 0x01;
const KBD_READY_BIT: u8 = 0x04;
const KBD_REPEAT_BIT: u8 = 0x08;
const KBD_FIRST_REPEAT_FRAMES: u8 = 60;
const KBD_NEXT_REPEAT_FRAMES: u8 = 8;

/// Invoked after a snapshot was copied into memory, with the 16-byte
/// snapshot name, so the host can apply per-program fixups.
pub type PatchFn = Box<dyn Fn(&[u8], &mut Memory)>;

pub struct Kc85 {
    variant: Variant,
    cpu: Z80,
    clock: Clock,
    keyboard: KeyBuffer,
    bus: Shared<Bus>,
    tick_fn: TickFn,
    patch_fn: Option<PatchFn>,
    frame_count: u32,
}

impl Kc85 {
    pub fn build(
        config: Config,
        frame_buffer: Shared<FrameBuffer>,
        sound: Arc<dyn SoundOutput>,
    ) -> Result<Kc85, BuildError> {
        info!(target: "kc85", "Initializing system");
        let variant = config.model.variant;
        let caos_e = config.roms.caos_e;
        match caos_e.len() {
            0x1000 | 0x2000 => {}
            len => return Err(BuildError::RomSizeMismatch("caos-e", len)),
        }
        let rom_caos_e = new_shared(Rom::new(caos_e));
        let rom_basic = match (variant, config.roms.basic) {
            (Variant::Kc852, _) => None,
            (_, None) => return Err(BuildError::MissingRom("basic")),
            (_, Some(image)) => {
                if image.len() != 0x2000 {
                    return Err(BuildError::RomSizeMismatch("basic", image.len()));
                }
                Some(new_shared(Rom::new(image)))
            }
        };
        let rom_caos_c = match (variant, config.roms.caos_c) {
            (Variant::Kc854, None) => return Err(BuildError::MissingRom("caos-c")),
            (Variant::Kc854, Some(image)) => {
                if image.len() != 0x1000 {
                    return Err(BuildError::RomSizeMismatch("caos-c", image.len()));
                }
                Some(new_shared(Rom::new(image)))
            }
            _ => None,
        };
        let bus = new_shared(Bus::new(
            config.model.clone(),
            rom_caos_e,
            rom_caos_c,
            rom_basic,
            frame_buffer,
            sound,
            &config.sound,
        ));
        let tick_fn: TickFn = {
            let bus = bus.clone();
            Rc::new(move |num_ticks, pins| bus.borrow_mut().tick(num_ticks, pins))
        };
        let mut cpu = Z80::new();
        // cold boot enters the OS through the upper ROM window
        cpu.set_pc(0xf000);
        Ok(Kc85 {
            variant,
            cpu,
            clock: Clock::new(config.model.cpu_freq),
            keyboard: KeyBuffer::new(KEY_STICKY_US),
            bus,
            tick_fn,
            patch_fn: None,
            frame_count: 0,
        })
    }

    pub fn set_patch_fn(&mut self, patch_fn: Option<PatchFn>) {
        self.patch_fn = patch_fn;
    }

    pub fn get_cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn get_cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    pub fn get_bus(&self) -> Shared<Bus> {
        self.bus.clone()
    }

    pub fn get_frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn reset(&mut self) {
        info!(target: "kc85", "Resetting system");
        self.cpu.reset();
        self.bus.borrow_mut().reset();
        self.clock.reset();
        self.keyboard.reset();
        self.frame_count = 0;
        // warm reset enters the OS at the bottom of the ROM window
        self.cpu.set_pc(0xe000);
    }

    /// Run the emulation for one host frame worth of wall-clock time.
    /// Returns the number of clock ticks executed.
    pub fn exec(&mut self, micro_seconds: u32) -> u32 {
        let budget = self.clock.ticks_to_run(micro_seconds);
        let executed = self.cpu.exec(budget, &self.tick_fn);
        self.clock.ticks_executed(executed);
        self.keyboard.update(micro_seconds);
        self.handle_keyboard();
        self.frame_count = self.frame_count.wrapping_add(1);
        executed
    }

    pub fn key_down(&mut self, code: u8) {
        self.keyboard.key_down(code);
    }

    pub fn key_up(&mut self, code: u8) {
        self.keyboard.key_up(code);
    }

    pub fn insert_module(
        &mut self,
        slot_addr: u8,
        module_type: ModuleType,
        rom: Option<&[u8]>,
    ) -> Result<(), ModuleError> {
        let mut bus = self.bus.borrow_mut();
        bus.expansion.insert_module(slot_addr, module_type, rom)?;
        bus.update_memory_map();
        Ok(())
    }

    pub fn remove_module(&mut self, slot_addr: u8) -> Result<(), ModuleError> {
        let mut bus = self.bus.borrow_mut();
        bus.expansion.remove_module(slot_addr)?;
        bus.update_memory_map();
        Ok(())
    }

    pub fn peek8(&self, addr: u16) -> u8 {
        self.bus.borrow().mem.r8(addr)
    }

    pub fn poke8(&mut self, addr: u16, value: u8) {
        self.bus.borrow_mut().mem.w8(addr, value);
    }

    /// Copy bytes into memory through the current memory mapping.
    pub fn write_bytes(&mut self, addr: u16, data: &[u8]) {
        self.bus.borrow_mut().mem.write_bytes(addr, data);
    }

    /// Start a freshly loaded program the way the OS loader would: clear
    /// the register file, wipe the OS ASCII buffer, publish the default
    /// output latches and point the return address at the OS main loop.
    pub fn load_start(&mut self, exec_addr: u16) {
        self.cpu.set_af(0x0010);
        self.cpu.set_bc(0x0000);
        self.cpu.set_de(0x0000);
        self.cpu.set_hl(0x0000);
        self.cpu.set_af_alt(0x0000);
        self.cpu.set_bc_alt(0x0000);
        self.cpu.set_de_alt(0x0000);
        self.cpu.set_hl_alt(0x0000);
        {
            let mut bus = self.bus.borrow_mut();
            for addr in 0xb200u16..0xb700 {
                bus.mem.w8(addr, 0x00);
            }
            bus.mem.w8(0xb7a0, 0x00);
            let return_stub = match self.variant {
                Variant::Kc853 => {
                    bus.set_pio_b(0x9f);
                    Some(0xf15c)
                }
                Variant::Kc854 => {
                    bus.set_pio_b(0xff);
                    Some(0xf17e)
                }
                Variant::Kc852 => None,
            };
            if let Some(stub) = return_stub {
                bus.mem.w16(self.cpu.get_sp(), stub);
            }
        }
        self.cpu.set_pc(exec_addr);
    }

    /// Report a mounted snapshot to the host's patch callback.
    pub fn notify_snapshot_loaded(&mut self, name: &[u8]) {
        if let Some(ref patch_fn) = self.patch_fn {
            let mut bus = self.bus.borrow_mut();
            patch_fn(name, &mut bus.mem);
        }
    }

    // Mirrors the OS keyboard interrupt service routine: the current key
    // is patched straight into the CAOS work area once per host frame.
    fn handle_keyboard(&mut self) {
        // with interrupts disabled IX may not point at the work area
        if !self.cpu.get_iff1() {
            return;
        }
        let ix = self.cpu.get_ix();
        let key = self.keyboard.most_recent_key();
        let mut bus = self.bus.borrow_mut();
        let status = bus.mem.r8(ix.wrapping_add(KBD_STATUS));
        if key == 0 {
            // keyboard timeout
            bus.mem
                .w8(ix.wrapping_add(KBD_STATUS), status | KBD_TIMEOUT_BIT);
            bus.mem.w8(ix.wrapping_add(KBD_KEY), 0);
        } else {
            let status = status & !KBD_TIMEOUT_BIT;
            if key != bus.mem.r8(ix.wrapping_add(KBD_KEY)) {
                // new key
                bus.mem.w8(ix.wrapping_add(KBD_KEY), key);
                bus.mem.w8(
                    ix.wrapping_add(KBD_STATUS),
                    (status & !KBD_REPEAT_BIT) | KBD_READY_BIT,
                );
                bus.mem.w8(ix.wrapping_add(KBD_REPEAT_COUNT), 0);
            } else {
                // same key held down, handle the repeat pacing
                let mut status = status;
                let count = bus.mem.r8(ix.wrapping_add(KBD_REPEAT_COUNT)).wrapping_add(1);
                bus.mem.w8(ix.wrapping_add(KBD_REPEAT_COUNT), count);
                if status & KBD_REPEAT_BIT != 0 {
                    if count < KBD_NEXT_REPEAT_FRAMES {
                        bus.mem.w8(ix.wrapping_add(KBD_STATUS), status);
                        return;
                    }
                } else {
                    if count < KBD_FIRST_REPEAT_FRAMES {
                        bus.mem.w8(ix.wrapping_add(KBD_STATUS), status);
                        return;
                    }
                    status |= KBD_REPEAT_BIT;
                }
                bus.mem
                    .w8(ix.wrapping_add(KBD_STATUS), status | KBD_READY_BIT);
                bus.mem.w8(ix.wrapping_add(KBD_REPEAT_COUNT), 0);
            }
        }
    }
}
