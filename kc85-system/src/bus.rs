// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;

use bit_field::BitField;

use kc85_core::factory::{Chip, SoundOutput};
use kc85_core::io::{ctc, pio, Ctc, Pio};
use kc85_core::mem::{Memory, Ram, Rom};
use kc85_core::pins;
use kc85_core::sound::Beeper;
use kc85_core::util::{new_shared, new_shared_cell, Shared, SharedCell};

use crate::config::{SoundConfig, SystemModel, Variant};
use crate::expansion::Expansion;
use crate::frame_buffer::FrameBuffer;
use crate::video::Video;

// PIO port A output bits (memory map switches)
pub const PIO_A_CAOS_ROM: u8 = 1 << 0;
pub const PIO_A_RAM: u8 = 1 << 1;
pub const PIO_A_IRM: u8 = 1 << 2;
pub const PIO_A_RAM_RW: u8 = 1 << 3;
pub const PIO_A_BASIC_ROM: u8 = 1 << 7;

// PIO port B output bits
pub const PIO_B_VOLUME_MASK: u8 = 0x0f;
pub const PIO_B_RAM8: u8 = 1 << 5;
pub const PIO_B_RAM8_RW: u8 = 1 << 6;
pub const PIO_B_BLINK_ENABLED: u8 = 1 << 7;

// I/O port 0x84 latch (KC85/4 only)
pub const IO84_SEL_VIEW_IMG: u8 = 1 << 0;
pub const IO84_SEL_CPU_COLOR: u8 = 1 << 1;
pub const IO84_SEL_CPU_IMG: u8 = 1 << 2;
pub const IO84_HICOLOR: u8 = 1 << 3;
pub const IO84_SEL_RAM8: u8 = 1 << 4;

// I/O port 0x86 latch (KC85/4 only)
pub const IO86_RAM4: u8 = 1 << 0;
pub const IO86_RAM4_RW: u8 = 1 << 1;
pub const IO86_CAOS_ROM_C: u8 = 1 << 7;

const BOOT_PIO_A: u8 = PIO_A_RAM | PIO_A_RAM_RW | PIO_A_IRM | PIO_A_CAOS_ROM;

// Design:
//   The bus owns everything the tick callback touches: memory, the two
//   peripheral chips, the video beam, the beepers and the audio batch
//   buffer, plus the I/O latches that drive the memory map. The pio
//   publishes its port outputs into shared latch cells through its out
//   callback and raises a dirty flag; the map is recomputed after the
//   current I/O machine cycle completes, never from inside the chip.
//   Per machine cycle the order is: memory/io access, video decode, then
//   one ctc/beeper step per clock tick, then the interrupt daisy chain
//   with the ctc ahead of the pio.

pub struct Bus {
    model: SystemModel,
    pub(crate) mem: Memory,
    pub(crate) ctc: Ctc,
    pub(crate) pio: Pio,
    pub(crate) expansion: Expansion,
    beeper_1: Beeper,
    beeper_2: Beeper,
    video: Video,
    frame_buffer: Shared<FrameBuffer>,
    sound: Arc<dyn SoundOutput>,
    sample_buf: Vec<f32>,
    sample_buf_size: usize,
    pio_a: SharedCell<u8>,
    pio_b: SharedCell<u8>,
    io84: u8,
    io86: u8,
    map_dirty: SharedCell<bool>,
    blink_flag: bool,
    // physical memory
    ram0: Shared<Ram>,
    ram4: Option<Shared<Ram>>,
    ram8: Option<Shared<Ram>>,
    irm: Shared<Ram>,
    rom_caos_e: Shared<Rom>,
    rom_caos_c: Option<Shared<Rom>>,
    rom_basic: Option<Shared<Rom>>,
}

impl Bus {
    pub fn new(
        model: SystemModel,
        rom_caos_e: Shared<Rom>,
        rom_caos_c: Option<Shared<Rom>>,
        rom_basic: Option<Shared<Rom>>,
        frame_buffer: Shared<FrameBuffer>,
        sound: Arc<dyn SoundOutput>,
        sound_cfg: &SoundConfig,
    ) -> Bus {
        let ram0 = new_shared(Ram::new(0x4000));
        let (ram4, ram8, irm) = match model.variant {
            Variant::Kc854 => (
                Some(new_shared(Ram::new(0x4000))),
                Some(new_shared(Ram::new(0x8000))),
                new_shared(Ram::new(0x10000)),
            ),
            _ => {
                // dynamic RAM powers on with garbage on the early models
                ram0.borrow_mut().fill_noise();
                let irm = new_shared(Ram::new(0x4000));
                irm.borrow_mut().fill_noise();
                (None, None, irm)
            }
        };
        let pio_a = new_shared_cell(0u8);
        let pio_b = new_shared_cell(0u8);
        let map_dirty = new_shared_cell(false);
        let mut pio_chip = Pio::new();
        {
            let pio_a = pio_a.clone();
            let pio_b = pio_b.clone();
            let map_dirty = map_dirty.clone();
            pio_chip.set_out_fn(Some(Box::new(move |port, value| {
                if port == pio::PORT_A {
                    pio_a.set(value);
                } else {
                    pio_b.set(value);
                }
                map_dirty.set(true);
            })));
        }
        let mut bus = Bus {
            mem: Memory::new(),
            ctc: Ctc::new(),
            pio: pio_chip,
            expansion: Expansion::new(),
            beeper_1: Beeper::new(model.cpu_freq, sound_cfg.sample_rate),
            beeper_2: Beeper::new(model.cpu_freq, sound_cfg.sample_rate),
            video: Video::new(&model),
            frame_buffer,
            sound,
            sample_buf: Vec::with_capacity(sound_cfg.buffer_size),
            sample_buf_size: sound_cfg.buffer_size,
            pio_a,
            pio_b,
            io84: 0,
            io86: 0,
            map_dirty,
            blink_flag: false,
            ram0,
            ram4,
            ram8,
            irm,
            rom_caos_e,
            rom_caos_c,
            rom_basic,
            model,
        };
        bus.pio_a.set(BOOT_PIO_A);
        bus.update_memory_map();
        bus
    }

    pub fn reset(&mut self) {
        self.ctc.reset();
        self.pio.reset();
        self.beeper_1.reset();
        self.beeper_2.reset();
        self.video.reset();
        self.blink_flag = false;
        self.sample_buf.clear();
        self.io84 = 0;
        self.io86 = 0;
        self.expansion.reset();
        self.pio_a.set(BOOT_PIO_A);
        self.pio_b.set(0);
        self.map_dirty.set(false);
        self.update_memory_map();
    }

    // -- Accessors

    pub fn mem(&self) -> &Memory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    pub fn irm(&self) -> Shared<Ram> {
        self.irm.clone()
    }

    pub fn get_pio_a(&self) -> u8 {
        self.pio_a.get()
    }

    pub fn get_pio_b(&self) -> u8 {
        self.pio_b.get()
    }

    /// Latch a PIO port A value as if the chip had driven it.
    pub fn set_pio_a(&mut self, value: u8) {
        self.pio_a.set(value);
        self.update_memory_map();
    }

    /// Latch a PIO port B value as if the chip had driven it.
    pub fn set_pio_b(&mut self, value: u8) {
        self.pio.write_data(pio::PORT_B, value);
        self.pio_b.set(value);
        self.map_dirty.set(false);
        self.update_memory_map();
    }

    pub fn get_io84(&self) -> u8 {
        self.io84
    }

    pub fn get_io86(&self) -> u8 {
        self.io86
    }

    pub fn get_blink_flag(&self) -> bool {
        self.blink_flag
    }

    // -- Tick callback body

    pub fn tick(&mut self, num_ticks: u32, mut pins: u64) -> u64 {
        // finish the previous frame's vsync pulse
        pins &= !ctc::CTC_CLKTRG2;
        if pins & pins::MREQ != 0 {
            let addr = pins::get_addr(pins);
            if pins & pins::RD != 0 {
                pins = pins::set_data(pins, self.mem.r8(addr));
            } else if pins & pins::WR != 0 {
                self.mem.w8(addr, pins::get_data(pins));
            }
        } else if pins & pins::IORQ != 0 && pins & pins::M1 == 0 {
            // M1 together with IORQ is the interrupt acknowledge, which
            // belongs to the daisy chain below, not to the port decoder
            pins = self.iorq(pins);
            if self.map_dirty.get() {
                self.map_dirty.set(false);
                self.update_memory_map();
            }
        }
        // video beam
        let blink_bg = self.blink_flag && self.pio_b.get() & PIO_B_BLINK_ENABLED != 0;
        let vsync = {
            let irm = self.irm.borrow();
            let mut frame_buffer = self.frame_buffer.borrow_mut();
            self.video
                .tick(num_ticks, &irm, &mut frame_buffer, blink_bg, self.io84)
        };
        if vsync {
            pins |= ctc::CTC_CLKTRG2;
        }
        // ctc, beepers and the sample stream run on every clock tick
        for _ in 0..num_ticks {
            pins = self.ctc.tick(pins);
            if pins & ctc::CTC_ZCTO0 != 0 {
                self.beeper_1.toggle();
            }
            if pins & ctc::CTC_ZCTO1 != 0 {
                self.beeper_2.toggle();
            }
            if pins & ctc::CTC_ZCTO2 != 0 {
                self.blink_flag = !self.blink_flag;
            }
            pins &= !(ctc::CTC_ZCTO0 | ctc::CTC_ZCTO1 | ctc::CTC_ZCTO2);
            self.beeper_1.tick();
            if self.beeper_2.tick() {
                let sample = self.beeper_1.sample() + self.beeper_2.sample();
                self.sample_buf.push(sample);
                if self.sample_buf.len() >= self.sample_buf_size {
                    self.sound.write(&self.sample_buf);
                    self.sample_buf.clear();
                }
            }
        }
        // interrupt daisy chain, the ctc has priority over the pio
        if pins & pins::M1 != 0 {
            pins |= pins::IEIO;
            pins = self.ctc.int(pins);
            pins = self.pio.int(pins);
            pins &= !pins::RETI;
        }
        pins
    }

    fn iorq(&mut self, mut pins: u64) -> u64 {
        let addr = pins::get_addr(pins);
        let port = addr as u8;
        if port & 0xf0 != 0x80 {
            return pins;
        }
        if pins & pins::RD != 0 {
            // undriven data lines float high
            pins = pins::set_data(pins, 0xff);
        }
        if port & 0x08 != 0 {
            if port & 0x04 != 0 {
                // ctc channels 0..3 at 0x8c..0x8f
                let mut chip_pins = pins | ctc::CTC_CE;
                if addr & 0x01 != 0 {
                    chip_pins |= ctc::CTC_CS0;
                }
                if addr & 0x02 != 0 {
                    chip_pins |= ctc::CTC_CS1;
                }
                pins = self.ctc.iorq(chip_pins)
                    & !(ctc::CTC_CE | ctc::CTC_CS0 | ctc::CTC_CS1);
            } else {
                // pio data/control at 0x88..0x8b
                let mut chip_pins = pins | pio::PIO_CE;
                if addr & 0x01 != 0 {
                    chip_pins |= pio::PIO_BASEL;
                }
                if addr & 0x02 != 0 {
                    chip_pins |= pio::PIO_CDSEL;
                }
                pins = self.pio.iorq(chip_pins)
                    & !(pio::PIO_CE | pio::PIO_BASEL | pio::PIO_CDSEL);
            }
        } else {
            match port {
                0x80 => {
                    // expansion slot control; the slot address rides in
                    // the upper address byte
                    let slot_addr = (addr >> 8) as u8;
                    if pins & pins::WR != 0 {
                        let value = pins::get_data(pins);
                        if self.expansion.write_ctrl(slot_addr, value) {
                            self.map_dirty.set(true);
                        }
                    } else if pins & pins::RD != 0 {
                        pins = pins::set_data(pins, self.expansion.module_id(slot_addr));
                    }
                }
                0x84 if self.model.variant == Variant::Kc854 => {
                    if pins & pins::WR != 0 {
                        self.io84 = pins::get_data(pins);
                        self.map_dirty.set(true);
                    }
                }
                0x86 if self.model.variant == Variant::Kc854 => {
                    if pins & pins::WR != 0 {
                        self.io86 = pins::get_data(pins);
                        self.map_dirty.set(true);
                    }
                }
                _ => {}
            }
        }
        pins
    }

    // -- Memory map policy

    pub fn update_memory_map(&mut self) {
        self.mem.unmap_bank(0);
        self.mem.unmap_bank(1);
        self.mem.unmap_bank(2);
        let pa = self.pio_a.get();
        let pb = self.pio_b.get();
        if pa & PIO_A_RAM != 0 {
            self.mem
                .map_ram(0, 0x0000, &self.ram0, 0, 0x4000, pa & PIO_A_RAM_RW != 0);
        }
        match self.model.variant {
            Variant::Kc852 | Variant::Kc853 => {
                if pa & PIO_A_IRM != 0 {
                    self.mem.map_ram(0, 0x8000, &self.irm, 0, 0x4000, true);
                }
                if self.model.variant == Variant::Kc853 && pa & PIO_A_BASIC_ROM != 0 {
                    if let Some(ref basic) = self.rom_basic {
                        let len = basic.borrow().len();
                        self.mem.map_rom(0, 0xc000, basic, 0, len);
                    }
                }
            }
            Variant::Kc854 => {
                if self.io86 & IO86_RAM4 != 0 {
                    if let Some(ref ram4) = self.ram4 {
                        self.mem.map_ram(
                            0,
                            0x4000,
                            ram4,
                            0,
                            0x4000,
                            self.io86 & IO86_RAM4_RW != 0,
                        );
                    }
                }
                if pb & PIO_B_RAM8 != 0 {
                    if let Some(ref ram8) = self.ram8 {
                        let offset = if self.io84 & IO84_SEL_RAM8 != 0 {
                            0x4000
                        } else {
                            0
                        };
                        self.mem.map_ram(
                            0,
                            0x8000,
                            ram8,
                            offset,
                            0x4000,
                            pb & PIO_B_RAM8_RW != 0,
                        );
                    }
                }
                if pa & PIO_A_IRM != 0 {
                    // one of four banks at 0x8000..0xa7ff, the system
                    // area 0xa800..0xbfff always views the first bank
                    let bank_offset = (usize::from(self.io84) & 0x06) << 13;
                    self.mem
                        .map_ram(0, 0x8000, &self.irm, bank_offset, 0x2800, true);
                    self.mem.map_ram(0, 0xa800, &self.irm, 0x2800, 0x1800, true);
                }
                if pa & PIO_A_BASIC_ROM != 0 {
                    if let Some(ref basic) = self.rom_basic {
                        let len = basic.borrow().len();
                        self.mem.map_rom(0, 0xc000, basic, 0, len);
                    }
                }
                if self.io86 & IO86_CAOS_ROM_C != 0 {
                    if let Some(ref caos_c) = self.rom_caos_c {
                        let len = caos_c.borrow().len();
                        self.mem.map_rom(0, 0xc000, caos_c, 0, len);
                    }
                }
            }
        }
        if pa & PIO_A_CAOS_ROM != 0 {
            let len = self.rom_caos_e.borrow().len();
            self.mem.map_rom(0, 0xe000, &self.rom_caos_e, 0, len);
            if len == 0x1000 {
                // a 4 KB image repeats through the upper window
                self.mem.map_rom(0, 0xf000, &self.rom_caos_e, 0, len);
            }
        }
        // expansion slots occupy the lower-priority banks
        let buf = self.expansion.get_buffer();
        for (index, slot) in self.expansion.slots().iter().enumerate() {
            if let Some(ref module) = slot.module {
                if slot.ctrl.get_bit(0) {
                    let base = u16::from(slot.ctrl & module.addr_mask) << 8;
                    let len = module.size.min(0x10000 - base as usize);
                    let writable = module.writable && slot.ctrl.get_bit(1);
                    self.mem
                        .map_ram(index + 1, base, &buf, slot.buf_offset, len, writable);
                }
            }
        }
    }
}
