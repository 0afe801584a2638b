//! Reference interpreter for the A64 subset the translator emits.
//!
//! Runs a block of host code against a register file, NZCV and a sparse
//! byte memory, so tests can check what emitted code computes rather
//! than which words it contains.

use std::collections::HashMap;

use dbt_backend::aarch64::emitter::decode_bit_masks;
use dbt_backend::{HostCond, Nzcv};

const STEP_LIMIT: usize = 100_000;

/// Why [`Machine::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// `RET` through X30: back to the dispatcher.
    Ret,
    /// `BR`/`BLR` to a register target.
    Br(u64),
    /// A direct branch left the code; byte offset from the block start.
    Exit(i64),
    Brk(u16),
    /// Word the interpreter does not know, at a byte offset.
    Undefined { offset: usize, word: u32 },
    StepLimit,
}

#[derive(Debug, Clone, Default)]
pub struct Machine {
    pub x: [u64; 31],
    pub sp: u64,
    pub nzcv: Nzcv,
    pub mem: HashMap<u64, u8>,
    /// Value `MRS CNTVCT_EL0` reads.
    pub cntvct: u64,
    pub steps: usize,
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sext(val: u64, bits: u32) -> u64 {
    if bits >= 64 {
        val
    } else {
        let shift = 64 - bits;
        (((val << shift) as i64) >> shift) as u64
    }
}

fn field(insn: u32, lo: u32, width: u32) -> u32 {
    (insn >> lo) & ((1u32 << width) - 1)
}

/// `AddWithCarry` from the A64 pseudocode.
fn add_with_carry(x: u64, y: u64, carry: bool, bits: u32) -> (u64, Nzcv) {
    let m = mask(bits);
    let (x, y) = (x & m, y & m);
    let unsigned = x as u128 + y as u128 + carry as u128;
    let result = (unsigned as u64) & m;
    let sx = sext(x, bits) as i64 as i128;
    let sy = sext(y, bits) as i64 as i128;
    let signed = sx + sy + carry as i128;
    let flags = Nzcv {
        n: result >> (bits - 1) & 1 == 1,
        z: result == 0,
        c: unsigned >> bits != 0,
        v: sext(result, bits) as i64 as i128 != signed,
    };
    (result, flags)
}

fn shift_reg(val: u64, shift: u32, amount: u32, bits: u32) -> u64 {
    let val = val & mask(bits);
    let amount = amount % bits;
    let out = match shift {
        0 => val << amount,
        1 => val >> amount,
        2 => (sext(val, bits) as i64 >> amount) as u64,
        _ => {
            if amount == 0 {
                val
            } else {
                (val >> amount) | (val << (bits - amount))
            }
        }
    };
    out & mask(bits)
}

fn crc32c(mut acc: u32, data: u64, bytes: u32) -> u32 {
    for i in 0..bytes {
        acc ^= ((data >> (8 * i)) & 0xFF) as u32;
        for _ in 0..8 {
            acc = if acc & 1 != 0 { (acc >> 1) ^ 0x82F6_3B78 } else { acc >> 1 };
        }
    }
    acc
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n`; 31 reads as zero.
    pub fn reg(&self, n: u32) -> u64 {
        if n == 31 {
            0
        } else {
            self.x[n as usize]
        }
    }

    fn reg_sp(&self, n: u32) -> u64 {
        if n == 31 {
            self.sp
        } else {
            self.x[n as usize]
        }
    }

    fn set(&mut self, n: u32, val: u64, sf: bool) {
        let val = if sf { val } else { val & 0xFFFF_FFFF };
        if n != 31 {
            self.x[n as usize] = val;
        }
    }

    fn set_sp(&mut self, n: u32, val: u64, sf: bool) {
        let val = if sf { val } else { val & 0xFFFF_FFFF };
        if n == 31 {
            self.sp = val;
        } else {
            self.x[n as usize] = val;
        }
    }

    pub fn read(&self, addr: u64, bytes: u32) -> u64 {
        (0..bytes).fold(0u64, |acc, i| {
            let b = self.mem.get(&addr.wrapping_add(i as u64)).copied().unwrap_or(0);
            acc | (b as u64) << (8 * i)
        })
    }

    pub fn write(&mut self, addr: u64, bytes: u32, val: u64) {
        for i in 0..bytes {
            self.mem.insert(addr.wrapping_add(i as u64), (val >> (8 * i)) as u8);
        }
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    /// Execute `code` from its first word until control leaves it.
    pub fn run(&mut self, code: &[u8]) -> Stop {
        let mut pc: i64 = 0;
        loop {
            if pc < 0 || pc as usize + 4 > code.len() {
                return Stop::Exit(pc);
            }
            if self.steps >= STEP_LIMIT {
                return Stop::StepLimit;
            }
            self.steps += 1;
            let off = pc as usize;
            let insn = u32::from_le_bytes([code[off], code[off + 1], code[off + 2], code[off + 3]]);
            match self.step(insn, pc) {
                Ok(next) => pc = next,
                Err(Some(stop)) => return stop,
                Err(None) => return Stop::Undefined { offset: off, word: insn },
            }
        }
    }

    /// One instruction at byte offset `pc`; returns the next offset.
    fn step(&mut self, insn: u32, pc: i64) -> Result<i64, Option<Stop>> {
        let next = pc + 4;
        let sf = insn >> 31 == 1;
        let bits = if sf { 64 } else { 32 };
        let rd = field(insn, 0, 5);
        let rn = field(insn, 5, 5);
        let rm = field(insn, 16, 5);

        match insn {
            0xD503_201F => return Ok(next),
            0xD65F_03C0 => return Err(Some(Stop::Ret)),
            _ => {}
        }
        if insn & 0xFFFF_FFE0 == 0xD53B_E040 {
            self.set(rd, self.cntvct, true);
            return Ok(next);
        }
        if insn & 0xFFFF_FFE0 == 0xD53B_4200 {
            self.set(rd, self.nzcv.to_bits() as u64, true);
            return Ok(next);
        }
        if insn & 0xFFFF_FFE0 == 0xD51B_4200 {
            let v = self.reg(rd);
            self.nzcv = Nzcv {
                n: v >> 31 & 1 == 1,
                z: v >> 30 & 1 == 1,
                c: v >> 29 & 1 == 1,
                v: v >> 28 & 1 == 1,
            };
            return Ok(next);
        }
        if insn & 0xFFE0_001F == 0xD420_0000 {
            return Err(Some(Stop::Brk(field(insn, 5, 16) as u16)));
        }

        // Branches
        if insn & 0x7C00_0000 == 0x1400_0000 {
            let disp = sext(field(insn, 0, 26) as u64, 26) as i64 * 4;
            if insn >> 31 == 1 {
                self.x[30] = next as u64;
            }
            return Ok(pc + disp);
        }
        if insn & 0xFF00_0010 == 0x5400_0000 {
            let disp = sext(field(insn, 5, 19) as u64, 19) as i64 * 4;
            let cond = HostCond::from_bits(field(insn, 0, 4));
            return Ok(if self.nzcv.eval(cond) { pc + disp } else { next });
        }
        if insn & 0x7E00_0000 == 0x3400_0000 {
            let disp = sext(field(insn, 5, 19) as u64, 19) as i64 * 4;
            let val = self.reg(rd) & mask(bits);
            let nonzero = field(insn, 24, 1) == 1;
            return Ok(if (val != 0) == nonzero { pc + disp } else { next });
        }
        if insn & 0x7E00_0000 == 0x3600_0000 {
            let disp = sext(field(insn, 5, 14) as u64, 14) as i64 * 4;
            let bit = (field(insn, 31, 1) << 5) | field(insn, 19, 5);
            let set = self.reg(rd) >> bit & 1 == 1;
            let nonzero = field(insn, 24, 1) == 1;
            return Ok(if set == nonzero { pc + disp } else { next });
        }
        match insn & 0xFFFF_FC1F {
            0xD61F_0000 => return Err(Some(Stop::Br(self.reg(rn)))),
            0xD63F_0000 => {
                let target = self.reg(rn);
                self.x[30] = next as u64;
                return Err(Some(Stop::Br(target)));
            }
            0xD65F_0000 => return Err(Some(Stop::Ret)),
            _ => {}
        }

        // Add/subtract (immediate)
        if insn & 0x1F80_0000 == 0x1100_0000 {
            let imm = (field(insn, 10, 12) as u64) << (12 * field(insn, 22, 1));
            let sub = field(insn, 30, 1) == 1;
            let s = field(insn, 29, 1) == 1;
            let x = self.reg_sp(rn);
            let (res, flags) = if sub {
                add_with_carry(x, !imm, true, bits)
            } else {
                add_with_carry(x, imm, false, bits)
            };
            if s {
                self.nzcv = flags;
                self.set(rd, res, sf);
            } else {
                self.set_sp(rd, res, sf);
            }
            return Ok(next);
        }
        // Logical (immediate)
        if insn & 0x1F80_0000 == 0x1200_0000 {
            let imm = decode_bit_masks(field(insn, 22, 1), field(insn, 16, 6), field(insn, 10, 6), sf)
                .ok_or(None)?;
            let x = self.reg(rn);
            let opc = field(insn, 29, 2);
            let res = match opc {
                0 | 3 => x & imm,
                1 => x | imm,
                _ => x ^ imm,
            } & mask(bits);
            if opc == 3 {
                self.nzcv = Nzcv {
                    n: res >> (bits - 1) & 1 == 1,
                    z: res == 0,
                    c: false,
                    v: false,
                };
                self.set(rd, res, sf);
            } else {
                self.set_sp(rd, res, sf);
            }
            return Ok(next);
        }
        // Move wide
        if insn & 0x1F80_0000 == 0x1280_0000 {
            let shift = field(insn, 21, 2) * 16;
            let imm = (field(insn, 5, 16) as u64) << shift;
            let res = match field(insn, 29, 2) {
                0 => !imm,
                2 => imm,
                3 => (self.reg(rd) & !(0xFFFF << shift)) | imm,
                _ => return Err(None),
            };
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Bitfield
        if insn & 0x1F80_0000 == 0x1300_0000 {
            let r = field(insn, 16, 6);
            let s = field(insn, 10, 6);
            let src = self.reg(rn) & mask(bits);
            let res = match field(insn, 29, 2) {
                0 | 2 => {
                    let signed = field(insn, 29, 2) == 0;
                    let (val, width) = if s >= r {
                        ((src >> r) & mask(s - r + 1), s - r + 1)
                    } else {
                        ((src & mask(s + 1)) << (bits - r), s + 1 + bits - r)
                    };
                    if signed {
                        sext(val, width)
                    } else {
                        val
                    }
                }
                1 => {
                    let dst = self.reg(rd);
                    if s >= r {
                        let w = s - r + 1;
                        (dst & !mask(w)) | ((src >> r) & mask(w))
                    } else {
                        let (w, lsb) = (s + 1, bits - r);
                        (dst & !(mask(w) << lsb)) | ((src & mask(w)) << lsb)
                    }
                }
                _ => return Err(None),
            };
            self.set(rd, res & mask(bits), sf);
            return Ok(next);
        }
        // Extract
        if insn & 0x1F80_0000 == 0x1380_0000 {
            let lsb = field(insn, 10, 6);
            let hi = self.reg(rn) & mask(bits);
            let lo = self.reg(rm) & mask(bits);
            let res = if lsb == 0 {
                lo
            } else {
                (lo >> lsb) | (hi << (bits - lsb))
            };
            self.set(rd, res & mask(bits), sf);
            return Ok(next);
        }
        // Logical (shifted register)
        if insn & 0x1F00_0000 == 0x0A00_0000 {
            let mut y = shift_reg(self.reg(rm), field(insn, 22, 2), field(insn, 10, 6), bits);
            if field(insn, 21, 1) == 1 {
                y = !y & mask(bits);
            }
            let x = self.reg(rn) & mask(bits);
            let opc = field(insn, 29, 2);
            let res = match opc {
                0 | 3 => x & y,
                1 => x | y,
                _ => x ^ y,
            };
            if opc == 3 {
                self.nzcv = Nzcv {
                    n: res >> (bits - 1) & 1 == 1,
                    z: res == 0,
                    c: false,
                    v: false,
                };
            }
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Add/subtract (shifted register)
        if insn & 0x1F20_0000 == 0x0B00_0000 {
            let y = shift_reg(self.reg(rm), field(insn, 22, 2), field(insn, 10, 6), bits);
            let x = self.reg(rn);
            let (res, flags) = if field(insn, 30, 1) == 1 {
                add_with_carry(x, !y, true, bits)
            } else {
                add_with_carry(x, y, false, bits)
            };
            if field(insn, 29, 1) == 1 {
                self.nzcv = flags;
            }
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Add/subtract with carry
        if insn & 0x1FE0_FC00 == 0x1A00_0000 {
            let x = self.reg(rn);
            let y = self.reg(rm);
            let y = if field(insn, 30, 1) == 1 { !y } else { y };
            let (res, flags) = add_with_carry(x, y, self.nzcv.c, bits);
            if field(insn, 29, 1) == 1 {
                self.nzcv = flags;
            }
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Conditional select
        if insn & 0x1FE0_0800 == 0x1A80_0000 {
            let cond = HostCond::from_bits(field(insn, 12, 4));
            let res = if self.nzcv.eval(cond) {
                self.reg(rn)
            } else {
                let y = self.reg(rm);
                match (field(insn, 30, 1), field(insn, 10, 1)) {
                    (0, 0) => y,
                    (0, _) => y.wrapping_add(1),
                    (_, 0) => !y,
                    _ => y.wrapping_neg(),
                }
            };
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Data processing (2 source)
        if insn & 0x5FE0_0000 == 0x1AC0_0000 {
            let x = self.reg(rn) & mask(bits);
            let y = self.reg(rm) & mask(bits);
            let res = match field(insn, 10, 6) {
                0x02 => x.checked_div(y).unwrap_or(0),
                0x03 => {
                    let (sx, sy) = (sext(x, bits) as i64, sext(y, bits) as i64);
                    if sy == 0 {
                        0
                    } else {
                        sx.wrapping_div(sy) as u64
                    }
                }
                0x08 => shift_reg(x, 0, y as u32 % bits, bits),
                0x09 => shift_reg(x, 1, y as u32 % bits, bits),
                0x0A => shift_reg(x, 2, y as u32 % bits, bits),
                0x0B => shift_reg(x, 3, y as u32 % bits, bits),
                op @ 0x14..=0x17 => {
                    let size = 1u32 << (op & 3);
                    crc32c(self.reg(rn) as u32, self.reg(rm), size) as u64
                }
                _ => return Err(None),
            };
            let sf = sf && !matches!(field(insn, 10, 6), 0x14..=0x17);
            self.set(rd, res & mask(bits), sf);
            return Ok(next);
        }
        // Data processing (1 source)
        if insn & 0x5FFF_0000 == 0x5AC0_0000 {
            let x = self.reg(rn) & mask(bits);
            let res = match field(insn, 10, 6) {
                0x00 => x.reverse_bits() >> (64 - bits),
                0x01 => {
                    let mut out = 0u64;
                    for i in 0..bits / 16 {
                        let h = ((x >> (16 * i)) & 0xFFFF) as u16;
                        out |= (h.swap_bytes() as u64) << (16 * i);
                    }
                    out
                }
                0x02 if sf => {
                    let lo = (x as u32).swap_bytes() as u64;
                    let hi = ((x >> 32) as u32).swap_bytes() as u64;
                    lo | hi << 32
                }
                0x02 => (x as u32).swap_bytes() as u64,
                0x03 if sf => x.swap_bytes(),
                0x04 => (x.leading_zeros() - (64 - bits)) as u64,
                0x05 => {
                    let v = sext(x, bits);
                    let lead = if (v as i64) < 0 { (!v).leading_zeros() } else { v.leading_zeros() };
                    (lead - 1 - (64 - bits)) as u64
                }
                _ => return Err(None),
            };
            self.set(rd, res & mask(bits), sf);
            return Ok(next);
        }
        // Data processing (3 source)
        if insn & 0x1F00_0000 == 0x1B00_0000 {
            let ra = field(insn, 10, 5);
            let o0 = field(insn, 15, 1);
            let (x, y, a) = (self.reg(rn), self.reg(rm), self.reg(ra));
            let res = match (field(insn, 21, 3), o0) {
                (0b000, 0) => a.wrapping_add(x.wrapping_mul(y)),
                (0b000, _) => a.wrapping_sub(x.wrapping_mul(y)),
                (0b001, 0) => {
                    let p = (x as u32 as i32 as i64).wrapping_mul(y as u32 as i32 as i64);
                    a.wrapping_add(p as u64)
                }
                (0b101, 0) => a.wrapping_add((x & 0xFFFF_FFFF) * (y & 0xFFFF_FFFF)),
                (0b010, _) => ((x as i64 as i128 * y as i64 as i128) >> 64) as u64,
                (0b110, _) => ((x as u128 * y as u128) >> 64) as u64,
                _ => return Err(None),
            };
            let sf = sf || field(insn, 21, 3) != 0;
            self.set(rd, res, sf);
            return Ok(next);
        }
        // Loads and stores (immediate)
        if insn & 0x3B00_0000 == 0x3800_0000 || insn & 0x3B00_0000 == 0x3900_0000 {
            return self.ldst(insn, rd, rn).map(|()| next);
        }
        Err(None)
    }

    fn ldst(&mut self, insn: u32, rt: u32, rn: u32) -> Result<(), Option<Stop>> {
        let size = field(insn, 30, 2);
        let bytes = 1u32 << size;
        let opc = field(insn, 22, 2);
        let base = self.reg_sp(rn);
        let (addr, writeback) = if field(insn, 24, 1) == 1 {
            (base.wrapping_add((field(insn, 10, 12) as u64) << size), None)
        } else {
            if field(insn, 21, 1) != 0 {
                return Err(None);
            }
            let imm = sext(field(insn, 12, 9) as u64, 9);
            match field(insn, 10, 2) {
                0b00 => (base.wrapping_add(imm), None),
                0b01 => (base, Some(base.wrapping_add(imm))),
                0b11 => (base.wrapping_add(imm), Some(base.wrapping_add(imm))),
                _ => return Err(None),
            }
        };
        match opc {
            0 => {
                let val = self.reg(rt);
                self.write(addr, bytes, val);
            }
            1 => {
                let val = self.read(addr, bytes);
                self.set(rt, val, true);
            }
            2 => {
                let val = sext(self.read(addr, bytes), 8 * bytes);
                self.set(rt, val, true);
            }
            _ => {
                let val = sext(self.read(addr, bytes), 8 * bytes);
                self.set(rt, val, false);
            }
        }
        if let Some(wb) = writeback {
            self.set_sp(rn, wb, true);
        }
        Ok(())
    }
}
