// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::Level;

use crate::factory::Chip;
use crate::pins;

use super::DaisyChain;

// Spec: Z80 CTC datasheet (UM0081), chapter "Counter/Timer Channels"

// Chip pins, disjoint from the cpu pin range (see pins.rs)
pub const CTC_CE: u64 = 1 << 39;
pub const CTC_CS0: u64 = 1 << 40;
pub const CTC_CS1: u64 = 1 << 41;
pub const CTC_CLKTRG0: u64 = 1 << 42;
pub const CTC_CLKTRG1: u64 = 1 << 43;
pub const CTC_CLKTRG2: u64 = 1 << 44;
pub const CTC_CLKTRG3: u64 = 1 << 45;
pub const CTC_ZCTO0: u64 = 1 << 46;
pub const CTC_ZCTO1: u64 = 1 << 47;
pub const CTC_ZCTO2: u64 = 1 << 48;

pub mod ctrl {
    pub const EI: u8 = 0x80;
    pub const MODE_COUNTER: u8 = 0x40;
    pub const PRESCALER_256: u8 = 0x20;
    pub const EDGE_RISING: u8 = 0x10;
    pub const TRIGGER_WAIT: u8 = 0x08;
    pub const CONST_FOLLOWS: u8 = 0x04;
    pub const RESET: u8 = 0x02;
    pub const CONTROL: u8 = 0x01;
}

pub const NUM_CHANNELS: usize = 4;

pub struct CtcChannel {
    control: u8,
    constant: u8,
    down_counter: u8,
    prescaler: u8,
    waiting_for_trigger: bool,
    ext_trigger: bool,
    pub daisy: DaisyChain,
}

impl CtcChannel {
    fn new() -> Self {
        Self {
            control: ctrl::RESET,
            constant: 0,
            down_counter: 0,
            prescaler: 0,
            waiting_for_trigger: false,
            ext_trigger: false,
            daisy: DaisyChain::new(),
        }
    }

    fn reset(&mut self) {
        self.control = ctrl::RESET;
        self.constant = 0;
        self.down_counter = 0;
        self.waiting_for_trigger = false;
        self.daisy.reset();
    }

    fn prescaler_mask(&self) -> u8 {
        if self.control & ctrl::PRESCALER_256 != 0 {
            0xff
        } else {
            0x0f
        }
    }

    fn is_stopped(&self) -> bool {
        self.control & (ctrl::RESET | ctrl::CONST_FOLLOWS) != 0
    }
}

/// Z80 CTC with four counter/timer channels sharing one daisy-chain section.
/// Channel index doubles as interrupt priority, channel 0 highest.
pub struct Ctc {
    chn: [CtcChannel; 4],
}

impl Ctc {
    pub fn new() -> Self {
        Self {
            chn: [
                CtcChannel::new(),
                CtcChannel::new(),
                CtcChannel::new(),
                CtcChannel::new(),
            ],
        }
    }

    pub fn get_counter(&self, chn: usize) -> u8 {
        self.chn[chn].down_counter
    }

    pub fn get_control(&self, chn: usize) -> u8 {
        self.chn[chn].control
    }

    pub fn get_vector(&self, chn: usize) -> u8 {
        self.chn[chn].daisy.get_vector()
    }

    fn write(&mut self, chn: usize, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "ctc::reg", "Write chn {} = 0x{:02x}", chn, value);
        }
        let channel = &mut self.chn[chn];
        if channel.control & ctrl::CONST_FOLLOWS != 0 {
            // time constant for the previous control word
            channel.constant = value;
            channel.control &= !(ctrl::CONST_FOLLOWS | ctrl::RESET);
            if channel.control & ctrl::MODE_COUNTER == 0
                && channel.control & ctrl::TRIGGER_WAIT != 0
            {
                channel.waiting_for_trigger = true;
            } else {
                channel.down_counter = channel.constant;
            }
        } else if value & ctrl::CONTROL != 0 {
            channel.control = value;
            if value & ctrl::RESET != 0 {
                channel.waiting_for_trigger = false;
            }
        } else if chn == 0 {
            // interrupt vector, distributed to all channels with the
            // channel number encoded in bits 1..2
            for (i, channel) in self.chn.iter_mut().enumerate() {
                channel.daisy.set_vector((value & 0xf8) | ((i as u8) << 1));
            }
        }
    }

    fn read(&self, chn: usize) -> u8 {
        self.chn[chn].down_counter
    }

    fn active_edge(&mut self, chn: usize, pins: u64) -> u64 {
        let channel = &mut self.chn[chn];
        if channel.control & ctrl::MODE_COUNTER != 0 {
            channel.down_counter = channel.down_counter.wrapping_sub(1);
            if channel.down_counter == 0 {
                return self.counter_zero(chn, pins);
            }
        } else if channel.waiting_for_trigger {
            channel.waiting_for_trigger = false;
            channel.down_counter = channel.constant;
        }
        pins
    }

    fn counter_zero(&mut self, chn: usize, mut pins: u64) -> u64 {
        let channel = &mut self.chn[chn];
        if channel.control & ctrl::EI != 0 {
            channel.daisy.request();
        }
        // channel 3 has no zero-count output pin
        if chn < 3 {
            pins |= CTC_ZCTO0 << chn;
        }
        channel.down_counter = channel.constant;
        pins
    }
}

impl Chip for Ctc {
    fn iorq(&mut self, mut pins: u64) -> u64 {
        if pins & CTC_CE != 0 {
            let chn = (if pins & CTC_CS1 != 0 { 2 } else { 0 })
                | (if pins & CTC_CS0 != 0 { 1 } else { 0 });
            if pins & pins::WR != 0 {
                self.write(chn, pins::get_data(pins));
            } else if pins & pins::RD != 0 {
                pins = pins::set_data(pins, self.read(chn));
            }
        }
        pins
    }

    fn tick(&mut self, mut pins: u64) -> u64 {
        for chn in 0..NUM_CHANNELS {
            let trigger = pins & (CTC_CLKTRG0 << chn) != 0;
            let channel = &mut self.chn[chn];
            if channel.is_stopped() {
                channel.ext_trigger = trigger;
                continue;
            }
            if channel.control & ctrl::MODE_COUNTER != 0 || channel.waiting_for_trigger {
                if trigger != channel.ext_trigger {
                    channel.ext_trigger = trigger;
                    let rising = trigger;
                    if rising == (channel.control & ctrl::EDGE_RISING != 0) {
                        pins = self.active_edge(chn, pins);
                    }
                }
            } else {
                // free-running timer mode
                channel.prescaler = channel.prescaler.wrapping_sub(1);
                if channel.prescaler & channel.prescaler_mask() == 0 {
                    let channel = &mut self.chn[chn];
                    channel.down_counter = channel.down_counter.wrapping_sub(1);
                    if channel.down_counter == 0 {
                        pins = self.counter_zero(chn, pins);
                    }
                }
            }
        }
        pins
    }

    fn int(&mut self, mut pins: u64) -> u64 {
        for chn in self.chn.iter_mut() {
            pins = chn.daisy.tick(pins);
        }
        pins
    }

    fn reset(&mut self) {
        for chn in self.chn.iter_mut() {
            chn.reset();
        }
    }
}

impl Default for Ctc {
    fn default() -> Self {
        Self::new()
    }
}
