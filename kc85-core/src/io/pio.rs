// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::Level;

use crate::factory::Chip;
use crate::pins;

use super::DaisyChain;

// Spec: Z80 PIO datasheet (UM0081), chapter "Parallel I/O"

// Chip pins, disjoint from the cpu and ctc pin ranges. Port data does not
// travel on the shared bus word; it is published through the out callback
// and polled through the in callback instead.
pub const PIO_CE: u64 = 1 << 49;
pub const PIO_BASEL: u64 = 1 << 50;
pub const PIO_CDSEL: u64 = 1 << 51;

pub const PORT_A: usize = 0;
pub const PORT_B: usize = 1;

pub mod intctrl {
    pub const EI: u8 = 0x80;
    pub const AND_OR: u8 = 0x40;
    pub const HIGH_LOW: u8 = 0x20;
    pub const MASK_FOLLOWS: u8 = 0x10;
}

#[derive(Clone, Copy, PartialEq)]
pub enum Mode {
    Output,
    Input,
    Bidirectional,
    BitControl,
}

impl Mode {
    pub fn from(value: u8) -> Mode {
        match value & 0x03 {
            0 => Mode::Output,
            1 => Mode::Input,
            2 => Mode::Bidirectional,
            _ => Mode::BitControl,
        }
    }
}

pub type PortOutFn = Box<dyn Fn(usize, u8)>;
pub type PortInFn = Box<dyn Fn(usize) -> u8>;

pub struct PioPort {
    input: u8,
    output: u8,
    port_pins: u8,
    mode: Mode,
    io_select: u8,
    int_control: u8,
    int_mask: u8,
    int_enabled: bool,
    expect_io_select: bool,
    expect_int_mask: bool,
    bctrl_match: bool,
    pub daisy: DaisyChain,
}

impl PioPort {
    fn new() -> Self {
        Self {
            input: 0,
            output: 0,
            port_pins: 0,
            mode: Mode::Input,
            io_select: 0,
            int_control: 0,
            int_mask: 0xff,
            int_enabled: false,
            expect_io_select: false,
            expect_int_mask: false,
            bctrl_match: false,
            daisy: DaisyChain::new(),
        }
    }

    fn reset(&mut self) {
        self.mode = Mode::Input;
        self.output = 0;
        self.io_select = 0;
        self.int_control &= !intctrl::EI;
        self.int_mask = 0xff;
        self.int_enabled = false;
        self.expect_io_select = false;
        self.expect_int_mask = false;
        self.bctrl_match = false;
        self.daisy.reset();
    }

    fn bctrl_value(&self) -> u8 {
        (self.input & self.io_select) | (self.output & !self.io_select)
    }
}

/// Z80 PIO with two ports. Port A precedes port B on the interrupt daisy
/// chain. The bidirectional handshake (mode 2 strobes) is not wired up on
/// this machine and behaves as a plain output latch.
pub struct Pio {
    port: [PioPort; 2],
    reset_active: bool,
    out_fn: Option<PortOutFn>,
    in_fn: Option<PortInFn>,
}

impl Pio {
    pub fn new() -> Self {
        Self {
            port: [PioPort::new(), PioPort::new()],
            reset_active: true,
            out_fn: None,
            in_fn: None,
        }
    }

    pub fn set_out_fn(&mut self, out_fn: Option<PortOutFn>) {
        self.out_fn = out_fn;
    }

    pub fn set_in_fn(&mut self, in_fn: Option<PortInFn>) {
        self.in_fn = in_fn;
    }

    pub fn get_mode(&self, port: usize) -> Mode {
        self.port[port].mode
    }

    pub fn get_output(&self, port: usize) -> u8 {
        self.port[port].output
    }

    pub fn get_port_pins(&self, port: usize) -> u8 {
        self.port[port].port_pins
    }

    pub fn is_int_enabled(&self, port: usize) -> bool {
        self.port[port].int_enabled
    }

    fn notify_out(&self, port: usize, value: u8) {
        if let Some(ref out_fn) = self.out_fn {
            out_fn(port, value);
        }
    }

    fn poll_in(&self, port: usize) -> Option<u8> {
        self.in_fn.as_ref().map(|in_fn| in_fn(port))
    }

    pub fn write_ctrl(&mut self, port: usize, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "pio::reg", "Write ctrl {} = 0x{:02x}", port, value);
        }
        self.reset_active = false;
        let p = &mut self.port[port];
        if p.expect_io_select {
            p.io_select = value;
            p.int_enabled = p.int_control & intctrl::EI != 0;
            p.expect_io_select = false;
        } else if p.expect_int_mask {
            p.int_mask = value;
            p.int_enabled = p.int_control & intctrl::EI != 0;
            p.expect_int_mask = false;
        } else {
            match value & 0x0f {
                0x0f => {
                    // set mode
                    p.mode = Mode::from(value.get_bits(6..8));
                    match p.mode {
                        Mode::BitControl => {
                            // next control word is the I/O select mask
                            p.expect_io_select = true;
                            p.int_enabled = false;
                            p.bctrl_match = false;
                        }
                        Mode::Output => {
                            p.port_pins = p.output;
                            let out = p.output;
                            self.notify_out(port, out);
                        }
                        _ => {}
                    }
                }
                0x07 => {
                    // interrupt control word
                    p.int_control = value & 0xf0;
                    if value & intctrl::MASK_FOLLOWS != 0 {
                        p.expect_int_mask = true;
                        p.int_enabled = false;
                        p.bctrl_match = false;
                        p.daisy.cancel_request();
                    } else {
                        p.int_enabled = value & intctrl::EI != 0;
                    }
                }
                0x03 => {
                    // interrupt enable/disable only
                    p.int_enabled = value & intctrl::EI != 0;
                }
                _ => {
                    if !value.get_bit(0) {
                        // interrupt vector; also arms the port's interrupt
                        p.daisy.set_vector(value);
                        p.int_enabled = true;
                    }
                }
            }
        }
    }

    pub fn write_data(&mut self, port: usize, value: u8) {
        if self.reset_active {
            return;
        }
        let p = &mut self.port[port];
        match p.mode {
            Mode::Output | Mode::Bidirectional => {
                p.output = value;
                p.port_pins = value;
                self.notify_out(port, value);
            }
            Mode::Input => {
                // output register can be preloaded while in input mode
                p.output = value;
            }
            Mode::BitControl => {
                p.output = value;
                p.port_pins = (p.input & p.io_select) | (p.output & !p.io_select);
                let out = p.port_pins;
                self.notify_out(port, out);
            }
        }
    }

    pub fn read_data(&mut self, port: usize) -> u8 {
        if let Some(input) = self.poll_in(port) {
            self.port[port].input = input;
        }
        let p = &self.port[port];
        match p.mode {
            Mode::Output => p.output,
            Mode::Input | Mode::Bidirectional => p.input,
            Mode::BitControl => p.bctrl_value(),
        }
    }

    pub fn read_ctrl(&self) -> u8 {
        (self.port[PORT_A].int_control & 0xc0) | (self.port[PORT_B].int_control >> 4)
    }

    /// Present external data at the port pins. In bit-control mode this
    /// runs the monitored-bit match logic and raises an interrupt on a
    /// false-to-true transition of the match condition.
    pub fn write_port(&mut self, port: usize, value: u8) {
        let p = &mut self.port[port];
        p.input = value;
        if p.mode == Mode::BitControl {
            p.port_pins = p.bctrl_value();
            let mask = !p.int_mask;
            let masked = p.port_pins & mask;
            let matched = match p.int_control & (intctrl::AND_OR | intctrl::HIGH_LOW) {
                0x00 => masked != mask,   // OR/LOW: any monitored bit low
                0x20 => masked != 0,      // OR/HIGH: any monitored bit high
                0x40 => masked == 0,      // AND/LOW: all monitored bits low
                _ => masked == mask,      // AND/HIGH: all monitored bits high
            };
            if matched && !p.bctrl_match && p.int_enabled {
                p.daisy.request();
            }
            p.bctrl_match = matched;
        }
    }
}

impl Chip for Pio {
    fn iorq(&mut self, mut pins: u64) -> u64 {
        if pins & PIO_CE != 0 {
            let port = if pins & PIO_BASEL != 0 { PORT_B } else { PORT_A };
            if pins & PIO_CDSEL != 0 {
                // control
                if pins & pins::WR != 0 {
                    self.write_ctrl(port, pins::get_data(pins));
                } else if pins & pins::RD != 0 {
                    pins = pins::set_data(pins, self.read_ctrl());
                }
            } else {
                // data
                if pins & pins::WR != 0 {
                    self.write_data(port, pins::get_data(pins));
                } else if pins & pins::RD != 0 {
                    let data = self.read_data(port);
                    pins = pins::set_data(pins, data);
                }
            }
        }
        pins
    }

    fn tick(&mut self, pins: u64) -> u64 {
        pins
    }

    fn int(&mut self, mut pins: u64) -> u64 {
        for port in self.port.iter_mut() {
            pins = port.daisy.tick(pins);
        }
        pins
    }

    fn reset(&mut self) {
        for port in self.port.iter_mut() {
            port.reset();
        }
        self.reset_active = true;
    }
}

impl Default for Pio {
    fn default() -> Self {
        Self::new()
    }
}
