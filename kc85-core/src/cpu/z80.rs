// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::factory::TickFn;
use crate::pins;

use super::alu;
use super::alu::{CF, HF, NF, PF, SF, VF, XF, YF, ZF};

// Spec: Z80 User Manual (UM008011); The Undocumented Z80 Documented for
// WZ/XY behavior and the DD/FD CB double-prefix semantics.
//
// Design:
//   The cpu is a straight interpreter. Each opcode is split into the
//   x (bits 7..6), y (bits 5..3), z (bits 2..0) fields of the standard
//   Z80 decoding tree and dispatched through nested matches. All bus
//   traffic goes through a handful of machine-cycle helpers which invoke
//   the tick callback once per machine cycle with the shared pin word,
//   harvest injected wait states, and keep the returned pins as the cpu's
//   view of the outside world (interrupt and NMI lines included). The
//   DD/FD prefix is a sticky register-remap flag consumed by the next
//   opcode; interrupts are not sampled between a prefix and its opcode.

// Register file indices; 16-bit pairs read big-endian from even indices.
const B: usize = 0;
const C: usize = 1;
const D: usize = 2;
const E: usize = 3;
const H: usize = 4;
const L: usize = 5;
const F: usize = 6;
const A: usize = 7;

#[derive(Clone, Copy, PartialEq)]
enum IndexReg {
    Hl,
    Ix,
    Iy,
}

pub struct Z80 {
    // Register file
    regs: [u8; 8],
    bc_alt: u16,
    de_alt: u16,
    hl_alt: u16,
    af_alt: u16,
    ix: u16,
    iy: u16,
    sp: u16,
    pc: u16,
    wz: u16,
    i: u8,
    r: u8,
    im: u8,
    iff1: bool,
    iff2: bool,
    ei_pending: bool,
    ixiy: IndexReg,
    // Bus state
    pins: u64,
    nmi_seen: bool,
    ticks: u32,
}

impl Z80 {
    pub fn new() -> Self {
        Self {
            regs: [0xff; 8],
            bc_alt: 0xffff,
            de_alt: 0xffff,
            hl_alt: 0xffff,
            af_alt: 0xffff,
            ix: 0xffff,
            iy: 0xffff,
            sp: 0xffff,
            pc: 0,
            wz: 0,
            i: 0,
            r: 0,
            im: 0,
            iff1: false,
            iff2: false,
            ei_pending: false,
            ixiy: IndexReg::Hl,
            pins: 0,
            nmi_seen: false,
            ticks: 0,
        }
    }

    pub fn reset(&mut self) {
        self.regs = [0xff; 8];
        self.bc_alt = 0xffff;
        self.de_alt = 0xffff;
        self.hl_alt = 0xffff;
        self.af_alt = 0xffff;
        self.ix = 0xffff;
        self.iy = 0xffff;
        self.sp = 0xffff;
        self.pc = 0;
        self.wz = 0;
        self.i = 0;
        self.r = 0;
        self.im = 0;
        self.iff1 = false;
        self.iff2 = false;
        self.ei_pending = false;
        self.ixiy = IndexReg::Hl;
        self.pins = 0;
        self.nmi_seen = false;
    }

    // -- Register accessors

    pub fn get_pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    pub fn get_sp(&self) -> u16 {
        self.sp
    }

    pub fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }

    pub fn get_ix(&self) -> u16 {
        self.ix
    }

    pub fn set_ix(&mut self, value: u16) {
        self.ix = value;
    }

    pub fn get_iy(&self) -> u16 {
        self.iy
    }

    pub fn set_iy(&mut self, value: u16) {
        self.iy = value;
    }

    pub fn get_af(&self) -> u16 {
        u16::from(self.regs[A]) << 8 | u16::from(self.regs[F])
    }

    pub fn set_af(&mut self, value: u16) {
        self.regs[A] = (value >> 8) as u8;
        self.regs[F] = value as u8;
    }

    pub fn get_bc(&self) -> u16 {
        self.rp(B)
    }

    pub fn set_bc(&mut self, value: u16) {
        self.set_rp_at(B, value);
    }

    pub fn get_de(&self) -> u16 {
        self.rp(D)
    }

    pub fn set_de(&mut self, value: u16) {
        self.set_rp_at(D, value);
    }

    pub fn get_hl(&self) -> u16 {
        self.rp(H)
    }

    pub fn set_hl(&mut self, value: u16) {
        self.set_rp_at(H, value);
    }

    pub fn set_af_alt(&mut self, value: u16) {
        self.af_alt = value;
    }

    pub fn set_bc_alt(&mut self, value: u16) {
        self.bc_alt = value;
    }

    pub fn set_de_alt(&mut self, value: u16) {
        self.de_alt = value;
    }

    pub fn set_hl_alt(&mut self, value: u16) {
        self.hl_alt = value;
    }

    pub fn get_wz(&self) -> u16 {
        self.wz
    }

    pub fn get_i(&self) -> u8 {
        self.i
    }

    pub fn get_r(&self) -> u8 {
        self.r
    }

    pub fn set_r(&mut self, value: u8) {
        self.r = value;
    }

    pub fn get_im(&self) -> u8 {
        self.im
    }

    pub fn get_iff1(&self) -> bool {
        self.iff1
    }

    pub fn set_iff1(&mut self, value: bool) {
        self.iff1 = value;
    }

    pub fn get_iff2(&self) -> bool {
        self.iff2
    }

    pub fn get_pins(&self) -> u64 {
        self.pins
    }

    /// True while no IX/IY prefix is pending, i.e. the cpu sits on a real
    /// instruction boundary.
    pub fn opdone(&self) -> bool {
        self.ixiy == IndexReg::Hl
    }

    // -- Execution

    /// Run whole instructions until at least `num_ticks` clock cycles have
    /// elapsed; returns the number of cycles actually executed. Interrupts
    /// are sampled on instruction boundaries, but never between a DD/FD
    /// prefix and its opcode.
    pub fn exec(&mut self, num_ticks: u32, tick_fn: &TickFn) -> u32 {
        self.ticks = 0;
        while self.ticks < num_ticks {
            self.step(tick_fn);
        }
        while !self.opdone() {
            self.step(tick_fn);
        }
        self.ticks
    }

    pub fn step(&mut self, tick_fn: &TickFn) {
        if self.ixiy == IndexReg::Hl {
            if self.ei_pending {
                self.iff1 = true;
                self.iff2 = true;
                self.ei_pending = false;
            } else if self.handle_interrupts(tick_fn) {
                // the dispatch counts as one step of its own
                return;
            }
        }
        let op = self.fetch(tick_fn);
        match op {
            0xcb => self.op_cb(tick_fn),
            0xdd => {
                self.ixiy = IndexReg::Ix;
                return;
            }
            0xfd => {
                self.ixiy = IndexReg::Iy;
                return;
            }
            0xed => {
                let op = self.fetch(tick_fn);
                self.op_ed(op, tick_fn);
            }
            _ => self.op_main(op, tick_fn),
        }
        self.ixiy = IndexReg::Hl;
    }

    fn handle_interrupts(&mut self, tick_fn: &TickFn) -> bool {
        if self.nmi_seen {
            self.nmi_seen = false;
            self.leave_halt();
            self.iff1 = false;
            // 5 clock M1 cycle, opcode is discarded, no pc increment
            self.bump_r();
            let pins = pins::set_addr(self.pins & !pins::CTRL_MASK, self.pc)
                | pins::M1
                | pins::MREQ
                | pins::RD;
            self.run_cycle(5, pins, tick_fn);
            let pc = self.pc;
            self.push16(pc, tick_fn);
            self.pc = 0x0066;
            self.wz = self.pc;
            return true;
        }
        if self.pins & pins::INT != 0 && self.iff1 {
            self.pins &= !pins::INT;
            self.iff1 = false;
            self.iff2 = false;
            self.leave_halt();
            // interrupt acknowledge cycle, vector byte on the data bus
            self.bump_r();
            let pins = pins::set_addr(self.pins & !pins::CTRL_MASK, self.pc)
                | pins::M1
                | pins::IORQ;
            self.run_cycle(4, pins, tick_fn);
            let vector = pins::get_data(self.pins);
            self.tick(2, tick_fn);
            match self.im {
                0 => {
                    // IM 0 executes the bus byte; nothing on this machine
                    // uses it, so the vector is dropped
                }
                1 => {
                    let pc = self.pc;
                    self.push16(pc, tick_fn);
                    self.pc = 0x0038;
                    self.wz = self.pc;
                }
                _ => {
                    let pc = self.pc;
                    self.push16(pc, tick_fn);
                    let table = u16::from(self.i) << 8 | u16::from(vector & 0xfe);
                    let lo = self.mread(table, tick_fn);
                    let hi = self.mread(table.wrapping_add(1), tick_fn);
                    self.pc = u16::from(hi) << 8 | u16::from(lo);
                    self.wz = self.pc;
                }
            }
            return true;
        }
        false
    }

    fn leave_halt(&mut self) {
        if self.pins & pins::HALT != 0 {
            self.pins &= !pins::HALT;
            self.pc = self.pc.wrapping_add(1);
        }
    }

    // -- Machine cycles

    fn store_pins(&mut self, new_pins: u64) {
        if self.pins & pins::NMI == 0 && new_pins & pins::NMI != 0 {
            self.nmi_seen = true;
        }
        self.pins = new_pins;
    }

    fn run_cycle(&mut self, num_ticks: u32, pins: u64, tick_fn: &TickFn) {
        let out = tick_fn(num_ticks, pins & !pins::WAIT_MASK);
        self.store_pins(out);
        self.ticks += num_ticks + pins::get_wait(out);
        self.pins &= !pins::WAIT_MASK;
    }

    /// Internal cycles with no bus transaction; not wait-enabled.
    fn tick(&mut self, num_ticks: u32, tick_fn: &TickFn) {
        if num_ticks > 0 {
            let pins = self.pins & !(pins::CTRL_MASK | pins::WAIT_MASK);
            let out = tick_fn(num_ticks, pins);
            self.store_pins(out);
            self.ticks += num_ticks;
            self.pins &= !pins::WAIT_MASK;
        }
    }

    fn bump_r(&mut self) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7f);
    }

    /// Opcode fetch: 4-clock M1 cycle, increments pc and the low 7 bits
    /// of the refresh register.
    fn fetch(&mut self, tick_fn: &TickFn) -> u8 {
        self.bump_r();
        let pins = pins::set_addr(self.pins & !pins::CTRL_MASK, self.pc)
            | pins::M1
            | pins::MREQ
            | pins::RD;
        self.pc = self.pc.wrapping_add(1);
        self.run_cycle(4, pins, tick_fn);
        pins::get_data(self.pins)
    }

    fn mread(&mut self, addr: u16, tick_fn: &TickFn) -> u8 {
        let pins = pins::set_addr(self.pins & !pins::CTRL_MASK, addr) | pins::MREQ | pins::RD;
        self.run_cycle(3, pins, tick_fn);
        pins::get_data(self.pins)
    }

    fn mwrite(&mut self, addr: u16, value: u8, tick_fn: &TickFn) {
        let pins = pins::set_addr_data(self.pins & !pins::CTRL_MASK, addr, value)
            | pins::MREQ
            | pins::WR;
        self.run_cycle(3, pins, tick_fn);
    }

    fn ioread(&mut self, addr: u16, tick_fn: &TickFn) -> u8 {
        let pins = pins::set_addr(self.pins & !pins::CTRL_MASK, addr) | pins::IORQ | pins::RD;
        self.run_cycle(4, pins, tick_fn);
        pins::get_data(self.pins)
    }

    fn iowrite(&mut self, addr: u16, value: u8, tick_fn: &TickFn) {
        let pins = pins::set_addr_data(self.pins & !pins::CTRL_MASK, addr, value)
            | pins::IORQ
            | pins::WR;
        self.run_cycle(4, pins, tick_fn);
    }

    fn imm8(&mut self, tick_fn: &TickFn) -> u8 {
        let value = self.mread(self.pc, tick_fn);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn imm16(&mut self, tick_fn: &TickFn) -> u16 {
        let lo = self.imm8(tick_fn);
        let hi = self.imm8(tick_fn);
        u16::from(hi) << 8 | u16::from(lo)
    }

    fn push16(&mut self, value: u16, tick_fn: &TickFn) {
        self.sp = self.sp.wrapping_sub(1);
        self.mwrite(self.sp, (value >> 8) as u8, tick_fn);
        self.sp = self.sp.wrapping_sub(1);
        self.mwrite(self.sp, value as u8, tick_fn);
    }

    fn pop16(&mut self, tick_fn: &TickFn) -> u16 {
        let lo = self.mread(self.sp, tick_fn);
        self.sp = self.sp.wrapping_add(1);
        let hi = self.mread(self.sp, tick_fn);
        self.sp = self.sp.wrapping_add(1);
        u16::from(hi) << 8 | u16::from(lo)
    }

    // -- Register plumbing

    fn rp(&self, idx: usize) -> u16 {
        u16::from(self.regs[idx]) << 8 | u16::from(self.regs[idx + 1])
    }

    fn set_rp_at(&mut self, idx: usize, value: u16) {
        self.regs[idx] = (value >> 8) as u8;
        self.regs[idx + 1] = value as u8;
    }

    /// HL with the active IX/IY prefix applied.
    fn hlx(&self) -> u16 {
        match self.ixiy {
            IndexReg::Hl => self.rp(H),
            IndexReg::Ix => self.ix,
            IndexReg::Iy => self.iy,
        }
    }

    fn set_hlx(&mut self, value: u16) {
        match self.ixiy {
            IndexReg::Hl => self.set_rp_at(H, value),
            IndexReg::Ix => self.ix = value,
            IndexReg::Iy => self.iy = value,
        }
    }

    fn get_rp(&self, p: u8) -> u16 {
        match p {
            0 => self.rp(B),
            1 => self.rp(D),
            2 => self.hlx(),
            _ => self.sp,
        }
    }

    fn set_rp(&mut self, p: u8, value: u16) {
        match p {
            0 => self.set_rp_at(B, value),
            1 => self.set_rp_at(D, value),
            2 => self.set_hlx(value),
            _ => self.sp = value,
        }
    }

    /// 8-bit register with the IX/IY half-register remap; never memory.
    fn get_r8x(&self, idx: u8) -> u8 {
        match (idx, self.ixiy) {
            (4, IndexReg::Ix) => (self.ix >> 8) as u8,
            (5, IndexReg::Ix) => self.ix as u8,
            (4, IndexReg::Iy) => (self.iy >> 8) as u8,
            (5, IndexReg::Iy) => self.iy as u8,
            _ => self.regs[idx as usize],
        }
    }

    fn set_r8x(&mut self, idx: u8, value: u8) {
        match (idx, self.ixiy) {
            (4, IndexReg::Ix) => self.ix = (self.ix & 0x00ff) | u16::from(value) << 8,
            (5, IndexReg::Ix) => self.ix = (self.ix & 0xff00) | u16::from(value),
            (4, IndexReg::Iy) => self.iy = (self.iy & 0x00ff) | u16::from(value) << 8,
            (5, IndexReg::Iy) => self.iy = (self.iy & 0xff00) | u16::from(value),
            _ => self.regs[idx as usize] = value,
        }
    }

    /// Effective address of the (HL) slot; with an active prefix this
    /// fetches the displacement, burns the address-calculation clocks and
    /// leaks the result into WZ.
    fn addr(&mut self, extra_ticks: u32, tick_fn: &TickFn) -> u16 {
        match self.ixiy {
            IndexReg::Hl => self.rp(H),
            _ => {
                let disp = self.imm8(tick_fn) as i8;
                self.tick(extra_ticks, tick_fn);
                let base = if self.ixiy == IndexReg::Ix {
                    self.ix
                } else {
                    self.iy
                };
                let addr = base.wrapping_add(disp as i16 as u16);
                self.wz = addr;
                addr
            }
        }
    }

    fn cond(&self, cc: u8) -> bool {
        let f = self.regs[F];
        match cc {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    // -- Main opcode table

    fn op_main(&mut self, op: u8, tick_fn: &TickFn) {
        let x = op >> 6;
        let y = (op >> 3) & 0x07;
        let z = op & 0x07;
        match x {
            0 => self.op_x0(y, z, tick_fn),
            1 => {
                if y == 6 && z == 6 {
                    // HALT: keep fetching the same byte until an interrupt
                    self.pins |= pins::HALT;
                    self.pc = self.pc.wrapping_sub(1);
                } else if z == 6 {
                    let addr = self.addr(5, tick_fn);
                    let value = self.mread(addr, tick_fn);
                    // the memory form always targets the plain register
                    self.regs[y as usize] = value;
                } else if y == 6 {
                    let addr = self.addr(5, tick_fn);
                    let value = self.regs[z as usize];
                    self.mwrite(addr, value, tick_fn);
                } else {
                    let value = self.get_r8x(z);
                    self.set_r8x(y, value);
                }
            }
            2 => {
                let value = if z == 6 {
                    let addr = self.addr(5, tick_fn);
                    self.mread(addr, tick_fn)
                } else {
                    self.get_r8x(z)
                };
                self.alu8(y, value);
            }
            _ => self.op_x3(y, z, tick_fn),
        }
    }

    fn op_x0(&mut self, y: u8, z: u8, tick_fn: &TickFn) {
        match z {
            0 => match y {
                0 => {}
                1 => {
                    let af = self.get_af();
                    let alt = self.af_alt;
                    self.set_af(alt);
                    self.af_alt = af;
                }
                2 => {
                    // DJNZ
                    self.tick(1, tick_fn);
                    let disp = self.imm8(tick_fn) as i8;
                    let b = self.regs[B].wrapping_sub(1);
                    self.regs[B] = b;
                    if b != 0 {
                        self.tick(5, tick_fn);
                        self.pc = self.pc.wrapping_add(disp as i16 as u16);
                        self.wz = self.pc;
                    }
                }
                3 => {
                    let disp = self.imm8(tick_fn) as i8;
                    self.tick(5, tick_fn);
                    self.pc = self.pc.wrapping_add(disp as i16 as u16);
                    self.wz = self.pc;
                }
                _ => {
                    let disp = self.imm8(tick_fn) as i8;
                    if self.cond(y - 4) {
                        self.tick(5, tick_fn);
                        self.pc = self.pc.wrapping_add(disp as i16 as u16);
                        self.wz = self.pc;
                    }
                }
            },
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    let value = self.imm16(tick_fn);
                    self.set_rp(p, value);
                } else {
                    let acc = self.hlx();
                    let value = self.get_rp(p);
                    let result = self.add16(acc, value);
                    self.set_hlx(result);
                    self.tick(7, tick_fn);
                }
            }
            2 => match y {
                0 => {
                    let bc = self.rp(B);
                    let a = self.regs[A];
                    self.mwrite(bc, a, tick_fn);
                    self.wz = u16::from(a) << 8 | (bc.wrapping_add(1) & 0x00ff);
                }
                1 => {
                    let bc = self.rp(B);
                    self.regs[A] = self.mread(bc, tick_fn);
                    self.wz = bc.wrapping_add(1);
                }
                2 => {
                    let de = self.rp(D);
                    let a = self.regs[A];
                    self.mwrite(de, a, tick_fn);
                    self.wz = u16::from(a) << 8 | (de.wrapping_add(1) & 0x00ff);
                }
                3 => {
                    let de = self.rp(D);
                    self.regs[A] = self.mread(de, tick_fn);
                    self.wz = de.wrapping_add(1);
                }
                4 => {
                    let addr = self.imm16(tick_fn);
                    let hl = self.hlx();
                    self.mwrite(addr, hl as u8, tick_fn);
                    self.mwrite(addr.wrapping_add(1), (hl >> 8) as u8, tick_fn);
                    self.wz = addr.wrapping_add(1);
                }
                5 => {
                    let addr = self.imm16(tick_fn);
                    let lo = self.mread(addr, tick_fn);
                    let hi = self.mread(addr.wrapping_add(1), tick_fn);
                    self.set_hlx(u16::from(hi) << 8 | u16::from(lo));
                    self.wz = addr.wrapping_add(1);
                }
                6 => {
                    let addr = self.imm16(tick_fn);
                    let a = self.regs[A];
                    self.mwrite(addr, a, tick_fn);
                    self.wz = u16::from(a) << 8 | (addr.wrapping_add(1) & 0x00ff);
                }
                _ => {
                    let addr = self.imm16(tick_fn);
                    self.regs[A] = self.mread(addr, tick_fn);
                    self.wz = addr.wrapping_add(1);
                }
            },
            3 => {
                let p = y >> 1;
                self.tick(2, tick_fn);
                let value = self.get_rp(p);
                if y & 1 == 0 {
                    self.set_rp(p, value.wrapping_add(1));
                } else {
                    self.set_rp(p, value.wrapping_sub(1));
                }
            }
            4 | 5 => {
                let dec = z == 5;
                if y == 6 {
                    let addr = self.addr(5, tick_fn);
                    let value = self.mread(addr, tick_fn);
                    self.tick(1, tick_fn);
                    let f = self.regs[F];
                    let (result, flags) = if dec {
                        alu::dec8(f, value)
                    } else {
                        alu::inc8(f, value)
                    };
                    self.regs[F] = flags;
                    self.mwrite(addr, result, tick_fn);
                } else {
                    let value = self.get_r8x(y);
                    let f = self.regs[F];
                    let (result, flags) = if dec {
                        alu::dec8(f, value)
                    } else {
                        alu::inc8(f, value)
                    };
                    self.regs[F] = flags;
                    self.set_r8x(y, result);
                }
            }
            6 => {
                if y == 6 {
                    match self.ixiy {
                        IndexReg::Hl => {
                            let value = self.imm8(tick_fn);
                            let hl = self.rp(H);
                            self.mwrite(hl, value, tick_fn);
                        }
                        _ => {
                            // LD (IX+d),n reads the displacement and the
                            // immediate back to back
                            let disp = self.imm8(tick_fn) as i8;
                            let value = self.imm8(tick_fn);
                            self.tick(2, tick_fn);
                            let base = if self.ixiy == IndexReg::Ix {
                                self.ix
                            } else {
                                self.iy
                            };
                            let addr = base.wrapping_add(disp as i16 as u16);
                            self.wz = addr;
                            self.mwrite(addr, value, tick_fn);
                        }
                    }
                } else {
                    let value = self.imm8(tick_fn);
                    self.set_r8x(y, value);
                }
            }
            _ => self.op_rot_a(y),
        }
    }

    fn op_rot_a(&mut self, y: u8) {
        let a = self.regs[A];
        let f = self.regs[F];
        match y {
            0 => {
                // RLCA
                let result = a.rotate_left(1);
                self.regs[A] = result;
                self.regs[F] =
                    (f & (SF | ZF | PF)) | (result & (XF | YF)) | (a >> 7);
            }
            1 => {
                // RRCA
                let result = a.rotate_right(1);
                self.regs[A] = result;
                self.regs[F] =
                    (f & (SF | ZF | PF)) | (result & (XF | YF)) | (a & CF);
            }
            2 => {
                // RLA
                let result = (a << 1) | (f & CF);
                self.regs[A] = result;
                self.regs[F] =
                    (f & (SF | ZF | PF)) | (result & (XF | YF)) | (a >> 7);
            }
            3 => {
                // RRA
                let result = (a >> 1) | ((f & CF) << 7);
                self.regs[A] = result;
                self.regs[F] =
                    (f & (SF | ZF | PF)) | (result & (XF | YF)) | (a & CF);
            }
            4 => {
                let (result, flags) = alu::daa(a, f);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            5 => {
                // CPL
                let result = !a;
                self.regs[A] = result;
                self.regs[F] =
                    (f & (SF | ZF | PF | CF)) | HF | NF | (result & (XF | YF));
            }
            6 => {
                // SCF, X/Y leak in from the accumulator
                self.regs[F] = (f & (SF | ZF | PF)) | CF | (a & (XF | YF));
            }
            _ => {
                // CCF, previous carry moves into half carry
                let half = if f & CF != 0 { HF } else { 0 };
                let carry = if f & CF != 0 { 0 } else { CF };
                self.regs[F] = (f & (SF | ZF | PF)) | half | carry | (a & (XF | YF));
            }
        }
    }

    fn op_x3(&mut self, y: u8, z: u8, tick_fn: &TickFn) {
        match z {
            0 => {
                self.tick(1, tick_fn);
                if self.cond(y) {
                    self.pc = self.pop16(tick_fn);
                    self.wz = self.pc;
                }
            }
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    let value = self.pop16(tick_fn);
                    if p == 3 {
                        self.set_af(value);
                    } else {
                        self.set_rp(p, value);
                    }
                } else {
                    match p {
                        0 => {
                            self.pc = self.pop16(tick_fn);
                            self.wz = self.pc;
                        }
                        1 => {
                            // EXX
                            let bc = self.rp(B);
                            let de = self.rp(D);
                            let hl = self.rp(H);
                            let bc_alt = self.bc_alt;
                            let de_alt = self.de_alt;
                            let hl_alt = self.hl_alt;
                            self.set_rp_at(B, bc_alt);
                            self.set_rp_at(D, de_alt);
                            self.set_rp_at(H, hl_alt);
                            self.bc_alt = bc;
                            self.de_alt = de;
                            self.hl_alt = hl;
                        }
                        2 => self.pc = self.hlx(),
                        _ => {
                            self.tick(2, tick_fn);
                            self.sp = self.hlx();
                        }
                    }
                }
            }
            2 => {
                let addr = self.imm16(tick_fn);
                self.wz = addr;
                if self.cond(y) {
                    self.pc = addr;
                }
            }
            3 => match y {
                0 => {
                    let addr = self.imm16(tick_fn);
                    self.wz = addr;
                    self.pc = addr;
                }
                2 => {
                    // OUT (n),A
                    let n = self.imm8(tick_fn);
                    let a = self.regs[A];
                    let port = u16::from(a) << 8 | u16::from(n);
                    self.iowrite(port, a, tick_fn);
                    self.wz = u16::from(a) << 8 | u16::from(n.wrapping_add(1));
                }
                3 => {
                    // IN A,(n)
                    let n = self.imm8(tick_fn);
                    let port = u16::from(self.regs[A]) << 8 | u16::from(n);
                    self.regs[A] = self.ioread(port, tick_fn);
                    self.wz = port.wrapping_add(1);
                }
                4 => {
                    // EX (SP),HL
                    let sp = self.sp;
                    let lo = self.mread(sp, tick_fn);
                    let hi = self.mread(sp.wrapping_add(1), tick_fn);
                    self.tick(1, tick_fn);
                    let hl = self.hlx();
                    self.mwrite(sp.wrapping_add(1), (hl >> 8) as u8, tick_fn);
                    self.mwrite(sp, hl as u8, tick_fn);
                    self.tick(2, tick_fn);
                    let value = u16::from(hi) << 8 | u16::from(lo);
                    self.set_hlx(value);
                    self.wz = value;
                }
                5 => {
                    // EX DE,HL never honors the prefix
                    let de = self.rp(D);
                    let hl = self.rp(H);
                    self.set_rp_at(D, hl);
                    self.set_rp_at(H, de);
                }
                6 => {
                    self.iff1 = false;
                    self.iff2 = false;
                    self.ei_pending = false;
                }
                _ => {
                    // EI takes effect after the following instruction
                    self.ei_pending = true;
                }
            },
            4 => {
                let addr = self.imm16(tick_fn);
                self.wz = addr;
                if self.cond(y) {
                    self.tick(1, tick_fn);
                    let pc = self.pc;
                    self.push16(pc, tick_fn);
                    self.pc = addr;
                }
            }
            5 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    self.tick(1, tick_fn);
                    let value = if p == 3 { self.get_af() } else { self.get_rp(p) };
                    self.push16(value, tick_fn);
                } else {
                    // p == 0 is CALL nn; 1..3 are the DD/ED/FD prefixes
                    // which are consumed before dispatch
                    let addr = self.imm16(tick_fn);
                    self.wz = addr;
                    self.tick(1, tick_fn);
                    let pc = self.pc;
                    self.push16(pc, tick_fn);
                    self.pc = addr;
                }
            }
            6 => {
                let value = self.imm8(tick_fn);
                self.alu8(y, value);
            }
            _ => {
                // RST
                self.tick(1, tick_fn);
                let pc = self.pc;
                self.push16(pc, tick_fn);
                self.pc = u16::from(y) * 8;
                self.wz = self.pc;
            }
        }
    }

    fn alu8(&mut self, op: u8, value: u8) {
        let a = self.regs[A];
        let f = self.regs[F];
        match op {
            0 => {
                let (result, flags) = alu::add8(a, value, 0);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            1 => {
                let (result, flags) = alu::add8(a, value, f & CF);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            2 => {
                let (result, flags) = alu::sub8(a, value, 0);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            3 => {
                let (result, flags) = alu::sub8(a, value, f & CF);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            4 => {
                let (result, flags) = alu::and8(a, value);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            5 => {
                let (result, flags) = alu::xor8(a, value);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            6 => {
                let (result, flags) = alu::or8(a, value);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            _ => {
                self.regs[F] = alu::cp8(a, value);
            }
        }
    }

    /// ADD HL/IX/IY,rp; S, Z and V survive, X/Y leak from the high result
    /// byte and WZ tracks acc+1.
    fn add16(&mut self, acc: u16, value: u16) -> u16 {
        self.wz = acc.wrapping_add(1);
        let sum = u32::from(acc) + u32::from(value);
        let result = sum as u16;
        let mut flags = self.regs[F] & (SF | ZF | VF);
        flags |= ((result >> 8) as u8) & (XF | YF);
        if sum > 0xffff {
            flags |= CF;
        }
        if (acc ^ value ^ result) & 0x1000 != 0 {
            flags |= HF;
        }
        self.regs[F] = flags;
        result
    }

    fn adc16(&mut self, value: u16) {
        let acc = self.rp(H);
        self.wz = acc.wrapping_add(1);
        let carry = u32::from(self.regs[F] & CF);
        let sum = u32::from(acc) + u32::from(value) + carry;
        let result = sum as u16;
        let mut flags = ((result >> 8) as u8) & (SF | XF | YF);
        if result == 0 {
            flags |= ZF;
        }
        if sum > 0xffff {
            flags |= CF;
        }
        if (acc ^ value ^ result) & 0x1000 != 0 {
            flags |= HF;
        }
        if (!(acc ^ value) & (acc ^ result)) & 0x8000 != 0 {
            flags |= VF;
        }
        self.regs[F] = flags;
        self.set_rp_at(H, result);
    }

    fn sbc16(&mut self, value: u16) {
        let acc = self.rp(H);
        self.wz = acc.wrapping_add(1);
        let carry = u32::from(self.regs[F] & CF);
        let diff = u32::from(acc)
            .wrapping_sub(u32::from(value))
            .wrapping_sub(carry);
        let result = diff as u16;
        let mut flags = NF | ((result >> 8) as u8) & (SF | XF | YF);
        if result == 0 {
            flags |= ZF;
        }
        if diff & 0x1_0000 != 0 {
            flags |= CF;
        }
        if (acc ^ value ^ result) & 0x1000 != 0 {
            flags |= HF;
        }
        if ((acc ^ value) & (acc ^ result)) & 0x8000 != 0 {
            flags |= VF;
        }
        self.regs[F] = flags;
        self.set_rp_at(H, result);
    }

    // -- CB prefix

    fn op_cb(&mut self, tick_fn: &TickFn) {
        match self.ixiy {
            IndexReg::Hl => {
                let op = self.fetch(tick_fn);
                let x = op >> 6;
                let y = (op >> 3) & 0x07;
                let z = op & 0x07;
                if z == 6 {
                    let addr = self.rp(H);
                    let value = self.mread(addr, tick_fn);
                    self.tick(1, tick_fn);
                    match x {
                        0 => {
                            let result = self.rot(y, value);
                            self.mwrite(addr, result, tick_fn);
                        }
                        1 => {
                            let wz_hi = (self.wz >> 8) as u8;
                            self.bit(y, value, wz_hi);
                        }
                        2 => self.mwrite(addr, value & !(1 << y), tick_fn),
                        _ => self.mwrite(addr, value | (1 << y), tick_fn),
                    }
                } else {
                    let value = self.regs[z as usize];
                    match x {
                        0 => {
                            let result = self.rot(y, value);
                            self.regs[z as usize] = result;
                        }
                        1 => self.bit(y, value, value),
                        2 => self.regs[z as usize] = value & !(1 << y),
                        _ => self.regs[z as usize] = value | (1 << y),
                    }
                }
            }
            _ => self.op_cb_indexed(tick_fn),
        }
    }

    /// DD/FD CB: displacement comes before the sub-opcode, the operand is
    /// always memory, and everything except BIT also copies the result
    /// into the register slot (undocumented double write).
    fn op_cb_indexed(&mut self, tick_fn: &TickFn) {
        let disp = self.imm8(tick_fn) as i8;
        let op = self.mread(self.pc, tick_fn);
        self.pc = self.pc.wrapping_add(1);
        self.tick(2, tick_fn);
        let base = if self.ixiy == IndexReg::Ix {
            self.ix
        } else {
            self.iy
        };
        let addr = base.wrapping_add(disp as i16 as u16);
        self.wz = addr;
        let x = op >> 6;
        let y = (op >> 3) & 0x07;
        let z = op & 0x07;
        let value = self.mread(addr, tick_fn);
        self.tick(1, tick_fn);
        if x == 1 {
            let wz_hi = (addr >> 8) as u8;
            self.bit(y, value, wz_hi);
        } else {
            let result = match x {
                0 => self.rot(y, value),
                2 => value & !(1 << y),
                _ => value | (1 << y),
            };
            self.mwrite(addr, result, tick_fn);
            if z != 6 {
                self.regs[z as usize] = result;
            }
        }
    }

    fn rot(&mut self, y: u8, value: u8) -> u8 {
        let f = self.regs[F];
        let (result, flags) = match y {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(f, value),
            3 => alu::rr8(f, value),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        };
        self.regs[F] = flags;
        result
    }

    fn bit(&mut self, y: u8, value: u8, xy_source: u8) {
        let masked = value & (1 << y);
        let mut flags = (self.regs[F] & CF) | HF | (xy_source & (XF | YF));
        if masked == 0 {
            flags |= ZF | PF;
        }
        flags |= masked & SF;
        self.regs[F] = flags;
    }

    // -- ED prefix

    fn op_ed(&mut self, op: u8, tick_fn: &TickFn) {
        let x = op >> 6;
        let y = (op >> 3) & 0x07;
        let z = op & 0x07;
        match x {
            1 => self.op_ed_x1(y, z, tick_fn),
            2 if z <= 3 && y >= 4 => self.op_ed_block(y, z, tick_fn),
            // everything else is a two-byte NONI/NOP
            _ => {}
        }
    }

    fn op_ed_x1(&mut self, y: u8, z: u8, tick_fn: &TickFn) {
        match z {
            0 => {
                // IN r,(C); y == 6 updates flags only
                let bc = self.rp(B);
                let value = self.ioread(bc, tick_fn);
                self.wz = bc.wrapping_add(1);
                self.regs[F] = (self.regs[F] & CF) | alu::szpxy(value);
                if y != 6 {
                    self.regs[y as usize] = value;
                }
            }
            1 => {
                // OUT (C),r; y == 6 outputs zero
                let bc = self.rp(B);
                let value = if y == 6 { 0 } else { self.regs[y as usize] };
                self.iowrite(bc, value, tick_fn);
                self.wz = bc.wrapping_add(1);
            }
            2 => {
                let value = self.get_rp_plain(y >> 1);
                if y & 1 == 0 {
                    self.sbc16(value);
                } else {
                    self.adc16(value);
                }
                self.tick(7, tick_fn);
            }
            3 => {
                let addr = self.imm16(tick_fn);
                let p = y >> 1;
                if y & 1 == 0 {
                    let value = self.get_rp_plain(p);
                    self.mwrite(addr, value as u8, tick_fn);
                    self.mwrite(addr.wrapping_add(1), (value >> 8) as u8, tick_fn);
                } else {
                    let lo = self.mread(addr, tick_fn);
                    let hi = self.mread(addr.wrapping_add(1), tick_fn);
                    self.set_rp_plain(p, u16::from(hi) << 8 | u16::from(lo));
                }
                self.wz = addr.wrapping_add(1);
            }
            4 => {
                // NEG fills every y slot
                let a = self.regs[A];
                let (result, flags) = alu::sub8(0, a, 0);
                self.regs[A] = result;
                self.regs[F] = flags;
            }
            5 => {
                // RETN/RETI; only 0x4d carries the RETI bus marker that
                // completes the daisy-chain handshake
                self.pc = self.pop16(tick_fn);
                self.wz = self.pc;
                self.iff1 = self.iff2;
                if y == 1 {
                    self.pins |= pins::RETI;
                }
            }
            6 => {
                self.im = match y & 0x03 {
                    0 | 1 => 0,
                    2 => 1,
                    _ => 2,
                };
            }
            _ => match y {
                0 => {
                    self.tick(1, tick_fn);
                    self.i = self.regs[A];
                }
                1 => {
                    self.tick(1, tick_fn);
                    self.r = self.regs[A];
                }
                2 => {
                    self.tick(1, tick_fn);
                    let value = self.i;
                    self.regs[A] = value;
                    self.regs[F] = (self.regs[F] & CF)
                        | alu::szxy(value)
                        | if self.iff2 { PF } else { 0 };
                }
                3 => {
                    self.tick(1, tick_fn);
                    let value = self.r;
                    self.regs[A] = value;
                    self.regs[F] = (self.regs[F] & CF)
                        | alu::szxy(value)
                        | if self.iff2 { PF } else { 0 };
                }
                4 => {
                    // RRD
                    let hl = self.rp(H);
                    let value = self.mread(hl, tick_fn);
                    self.tick(4, tick_fn);
                    let a = self.regs[A];
                    let result = (a & 0xf0) | (value & 0x0f);
                    self.mwrite(hl, (a << 4) | (value >> 4), tick_fn);
                    self.regs[A] = result;
                    self.regs[F] = (self.regs[F] & CF) | alu::szpxy(result);
                    self.wz = hl.wrapping_add(1);
                }
                5 => {
                    // RLD
                    let hl = self.rp(H);
                    let value = self.mread(hl, tick_fn);
                    self.tick(4, tick_fn);
                    let a = self.regs[A];
                    let result = (a & 0xf0) | (value >> 4);
                    self.mwrite(hl, (value << 4) | (a & 0x0f), tick_fn);
                    self.regs[A] = result;
                    self.regs[F] = (self.regs[F] & CF) | alu::szpxy(result);
                    self.wz = hl.wrapping_add(1);
                }
                _ => {}
            },
        }
    }

    // The ED table ignores the IX/IY prefix; rp slot 2 is always HL.
    fn get_rp_plain(&self, p: u8) -> u16 {
        match p {
            0 => self.rp(B),
            1 => self.rp(D),
            2 => self.rp(H),
            _ => self.sp,
        }
    }

    fn set_rp_plain(&mut self, p: u8, value: u16) {
        match p {
            0 => self.set_rp_at(B, value),
            1 => self.set_rp_at(D, value),
            2 => self.set_rp_at(H, value),
            _ => self.sp = value,
        }
    }

    fn op_ed_block(&mut self, y: u8, z: u8, tick_fn: &TickFn) {
        let decrement = y & 1 != 0;
        let repeat = y >= 6;
        match z {
            0 => {
                // LDI/LDD/LDIR/LDDR
                let hl = self.rp(H);
                let de = self.rp(D);
                let value = self.mread(hl, tick_fn);
                self.mwrite(de, value, tick_fn);
                self.tick(2, tick_fn);
                let step = if decrement { 0xffffu16 } else { 1 };
                self.set_rp_at(H, hl.wrapping_add(step));
                self.set_rp_at(D, de.wrapping_add(step));
                let bc = self.rp(B).wrapping_sub(1);
                self.set_rp_at(B, bc);
                let n = value.wrapping_add(self.regs[A]);
                let mut flags = self.regs[F] & (SF | ZF | CF);
                if n & 0x02 != 0 {
                    flags |= YF;
                }
                if n & 0x08 != 0 {
                    flags |= XF;
                }
                if bc != 0 {
                    flags |= PF;
                }
                self.regs[F] = flags;
                if repeat && bc != 0 {
                    self.tick(5, tick_fn);
                    self.pc = self.pc.wrapping_sub(2);
                    self.wz = self.pc.wrapping_add(1);
                }
            }
            1 => {
                // CPI/CPD/CPIR/CPDR
                let hl = self.rp(H);
                let value = self.mread(hl, tick_fn);
                self.tick(5, tick_fn);
                let step = if decrement { 0xffffu16 } else { 1 };
                self.set_rp_at(H, hl.wrapping_add(step));
                let bc = self.rp(B).wrapping_sub(1);
                self.set_rp_at(B, bc);
                self.wz = self.wz.wrapping_add(step);
                let a = self.regs[A];
                let result = a.wrapping_sub(value);
                let mut flags = (self.regs[F] & CF) | NF | alu::sz(result);
                if (a ^ value ^ result) & 0x10 != 0 {
                    flags |= HF;
                }
                let n = if flags & HF != 0 {
                    result.wrapping_sub(1)
                } else {
                    result
                };
                if n & 0x02 != 0 {
                    flags |= YF;
                }
                if n & 0x08 != 0 {
                    flags |= XF;
                }
                if bc != 0 {
                    flags |= PF;
                }
                self.regs[F] = flags;
                if repeat && bc != 0 && result != 0 {
                    self.tick(5, tick_fn);
                    self.pc = self.pc.wrapping_sub(2);
                    self.wz = self.pc.wrapping_add(1);
                }
            }
            2 => {
                // INI/IND/INIR/INDR
                self.tick(1, tick_fn);
                let bc = self.rp(B);
                let value = self.ioread(bc, tick_fn);
                let step = if decrement { 0xffffu16 } else { 1 };
                self.wz = bc.wrapping_add(step);
                let b = self.regs[B].wrapping_sub(1);
                self.regs[B] = b;
                let hl = self.rp(H);
                self.mwrite(hl, value, tick_fn);
                self.set_rp_at(H, hl.wrapping_add(step));
                let c_adj = if decrement {
                    self.regs[C].wrapping_sub(1)
                } else {
                    self.regs[C].wrapping_add(1)
                };
                self.regs[F] = Self::block_io_flags(b, value, c_adj);
                if repeat && b != 0 {
                    self.tick(5, tick_fn);
                    self.pc = self.pc.wrapping_sub(2);
                }
            }
            _ => {
                // OUTI/OUTD/OTIR/OTDR
                self.tick(1, tick_fn);
                let hl = self.rp(H);
                let value = self.mread(hl, tick_fn);
                let b = self.regs[B].wrapping_sub(1);
                self.regs[B] = b;
                let bc = self.rp(B);
                self.iowrite(bc, value, tick_fn);
                let step = if decrement { 0xffffu16 } else { 1 };
                self.set_rp_at(H, hl.wrapping_add(step));
                self.wz = bc.wrapping_add(step);
                let l = self.regs[L];
                self.regs[F] = Self::block_io_flags(b, value, l);
                if repeat && b != 0 {
                    self.tick(5, tick_fn);
                    self.pc = self.pc.wrapping_sub(2);
                }
            }
        }
    }

    // Undocumented flag recipe shared by the block I/O family.
    fn block_io_flags(b: u8, value: u8, adj: u8) -> u8 {
        let mut flags = alu::szxy(b);
        if value & 0x80 != 0 {
            flags |= NF;
        }
        let k = u16::from(value) + u16::from(adj);
        if k > 0xff {
            flags |= HF | CF;
        }
        flags | alu::parity(((k & 0x07) as u8) ^ b)
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}
