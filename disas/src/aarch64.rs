//! AArch64 (A64) disassembler.
//!
//! Covers the integer subset the translator emits: add/sub, logical,
//! move-wide, bitfield, extract, 1- and 2-source data processing,
//! multiply, conditional select, add/sub with carry, CRC32C, loads and
//! stores with immediate offsets, branches, NOP, BRK and the virtual
//! counter read. Anything else prints as `.word`.

const COND: [&str; 16] = [
    "eq", "ne", "hs", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "al", "nv",
];

/// Register name; `zr` selects how encoding 31 reads.
fn reg(sf: bool, r: u32, zr: bool) -> String {
    let r = r & 0x1f;
    match (r, zr, sf) {
        (31, true, true) => "xzr".into(),
        (31, true, false) => "wzr".into(),
        (31, false, true) => "sp".into(),
        (31, false, false) => "wsp".into(),
        (_, _, true) => format!("x{r}"),
        (_, _, false) => format!("w{r}"),
    }
}

fn xr(r: u32) -> String {
    reg(true, r, true)
}

fn sign_ext(val: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    ((val << shift) as i32 >> shift) as i64
}

fn bits(insn: u32, lo: u32, width: u32) -> u32 {
    (insn >> lo) & ((1 << width) - 1)
}

/// Disassemble one A64 instruction at `pc`.
///
/// Returns `(assembly_text, 4)`, or `(".byte ???", 0)` when fewer than
/// four bytes are available.
pub fn print_insn_aarch64(pc: u64, data: &[u8]) -> (String, usize) {
    if data.len() < 4 {
        return (".byte ???".into(), 0);
    }
    let insn = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    (disasm(insn, pc), 4)
}

/// Listing of a whole block, one `addr: word  text` line per word.
pub fn disas_block(pc: u64, code: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in code.chunks_exact(4).enumerate() {
        let addr = pc + 4 * i as u64;
        let (text, _) = print_insn_aarch64(addr, chunk);
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out.push_str(&format!("{addr:#010x}: {word:08x}  {text}\n"));
    }
    out
}

fn disasm(insn: u32, pc: u64) -> String {
    match insn {
        0xD503_201F => return "nop".into(),
        0xD65F_03C0 => return "ret".into(),
        _ => {}
    }
    if insn & 0xFFFF_FFE0 == 0xD53B_E040 {
        return format!("mrs {}, cntvct_el0", xr(insn));
    }
    if insn & 0xFFFF_FFE0 == 0xD53B_4200 {
        return format!("mrs {}, nzcv", xr(insn));
    }
    if insn & 0xFFFF_FFE0 == 0xD51B_4200 {
        return format!("msr nzcv, {}", xr(insn));
    }
    if insn & 0xFFE0_001F == 0xD420_0000 {
        return format!("brk #{:#x}", bits(insn, 5, 16));
    }
    match bits(insn, 25, 4) {
        0b1000 | 0b1001 => disasm_dp_imm(insn),
        0b1010 | 0b1011 => disasm_branch(insn, pc),
        0b0100 | 0b0110 | 0b1100 | 0b1110 => disasm_ldst(insn),
        0b0101 | 0b1101 => disasm_dp_reg(insn),
        _ => format!(".word {insn:#010x}"),
    }
}

// -- Data processing (immediate) --

fn disasm_dp_imm(insn: u32) -> String {
    let sf = insn >> 31 == 1;
    let rd = bits(insn, 0, 5);
    let rn = bits(insn, 5, 5);
    match bits(insn, 23, 3) {
        0b010 | 0b011 => {
            let op = bits(insn, 30, 1);
            let s = bits(insn, 29, 1) == 1;
            let sh = bits(insn, 22, 1);
            let imm = bits(insn, 10, 12) << (12 * sh);
            let name = match (op, s) {
                (0, false) => "add",
                (0, true) => "adds",
                (_, false) => "sub",
                (_, true) => "subs",
            };
            if s && rd == 31 {
                let alias = if op == 0 { "cmn" } else { "cmp" };
                return format!("{alias} {}, #{imm:#x}", reg(sf, rn, false));
            }
            format!("{name} {}, {}, #{imm:#x}", reg(sf, rd, s), reg(sf, rn, false))
        }
        0b100 => {
            let opc = bits(insn, 29, 2);
            let n = bits(insn, 22, 1);
            let immr = bits(insn, 16, 6);
            let imms = bits(insn, 10, 6);
            let Some(imm) = decode_bit_masks(n, immr, imms, sf) else {
                return format!(".word {insn:#010x}");
            };
            match opc {
                0b11 if rd == 31 => format!("tst {}, #{imm:#x}", reg(sf, rn, true)),
                0b01 if rn == 31 => format!("mov {}, #{imm:#x}", reg(sf, rd, false)),
                _ => {
                    let name = ["and", "orr", "eor", "ands"][opc as usize];
                    format!("{name} {}, {}, #{imm:#x}", reg(sf, rd, opc == 3), reg(sf, rn, true))
                }
            }
        }
        0b101 => {
            let opc = bits(insn, 29, 2);
            let hw = bits(insn, 21, 2);
            let imm = bits(insn, 5, 16);
            let name = match opc {
                0b00 => "movn",
                0b10 => "movz",
                0b11 => "movk",
                _ => return format!(".word {insn:#010x}"),
            };
            if hw == 0 {
                format!("{name} {}, #{imm:#x}", reg(sf, rd, true))
            } else {
                format!("{name} {}, #{imm:#x}, lsl #{}", reg(sf, rd, true), hw * 16)
            }
        }
        0b110 => disasm_bitfield(insn, sf, rd, rn),
        0b111 => {
            let rm = bits(insn, 16, 5);
            let lsb = bits(insn, 10, 6);
            if rn == rm {
                format!("ror {}, {}, #{lsb}", reg(sf, rd, true), reg(sf, rn, true))
            } else {
                format!(
                    "extr {}, {}, {}, #{lsb}",
                    reg(sf, rd, true),
                    reg(sf, rn, true),
                    reg(sf, rm, true)
                )
            }
        }
        _ => format!(".word {insn:#010x}"),
    }
}

fn disasm_bitfield(insn: u32, sf: bool, rd: u32, rn: u32) -> String {
    let opc = bits(insn, 29, 2);
    let immr = bits(insn, 16, 6);
    let imms = bits(insn, 10, 6);
    let size = if sf { 64 } else { 32 };
    let (d, n) = (reg(sf, rd, true), reg(sf, rn, true));
    match opc {
        // SBFM
        0b00 => {
            if imms == size - 1 {
                format!("asr {d}, {n}, #{immr}")
            } else if immr == 0 && imms == 31 && sf {
                format!("sxtw {d}, {}", reg(false, rn, true))
            } else if imms >= immr {
                format!("sbfx {d}, {n}, #{immr}, #{}", imms - immr + 1)
            } else {
                format!("sbfiz {d}, {n}, #{}, #{}", size - immr, imms + 1)
            }
        }
        // BFM
        0b01 => {
            if imms < immr {
                format!("bfi {d}, {n}, #{}, #{}", (size - immr) % size, imms + 1)
            } else {
                format!("bfxil {d}, {n}, #{immr}, #{}", imms - immr + 1)
            }
        }
        // UBFM
        0b10 => {
            if imms == size - 1 {
                format!("lsr {d}, {n}, #{immr}")
            } else if imms + 1 == immr {
                format!("lsl {d}, {n}, #{}", size - immr)
            } else if imms >= immr {
                format!("ubfx {d}, {n}, #{immr}, #{}", imms - immr + 1)
            } else {
                format!("ubfiz {d}, {n}, #{}, #{}", size - immr, imms + 1)
            }
        }
        _ => format!(".word {insn:#010x}"),
    }
}

/// `DecodeBitMasks` for the `wmask` result.
fn decode_bit_masks(n: u32, immr: u32, imms: u32, sf: bool) -> Option<u64> {
    let combined = (n << 6) | (!imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 || (!sf && n != 0) {
        return None;
    }
    let esize = 1u32 << len;
    let levels = esize - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let emask = if esize == 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let welem = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 {
        welem
    } else {
        ((welem >> r) | (welem << (esize - r))) & emask
    };
    let mut out = 0u64;
    let mut pos = 0;
    while pos < 64 {
        out |= elem << pos;
        pos += esize;
    }
    Some(if sf { out } else { out & 0xFFFF_FFFF })
}

// -- Branches --

fn disasm_branch(insn: u32, pc: u64) -> String {
    let target = |off: i64| pc.wrapping_add((off * 4) as u64);
    if insn & 0x7C00_0000 == 0x1400_0000 {
        let off = sign_ext(bits(insn, 0, 26), 26);
        let name = if insn >> 31 == 1 { "bl" } else { "b" };
        return format!("{name} {:#x}", target(off));
    }
    if insn & 0xFF00_0010 == 0x5400_0000 {
        let off = sign_ext(bits(insn, 5, 19), 19);
        return format!("b.{} {:#x}", COND[bits(insn, 0, 4) as usize], target(off));
    }
    if insn & 0x7E00_0000 == 0x3400_0000 {
        let sf = insn >> 31 == 1;
        let name = if bits(insn, 24, 1) == 1 { "cbnz" } else { "cbz" };
        let off = sign_ext(bits(insn, 5, 19), 19);
        return format!("{name} {}, {:#x}", reg(sf, bits(insn, 0, 5), true), target(off));
    }
    if insn & 0x7E00_0000 == 0x3600_0000 {
        let name = if bits(insn, 24, 1) == 1 { "tbnz" } else { "tbz" };
        let bit = (bits(insn, 31, 1) << 5) | bits(insn, 19, 5);
        let off = sign_ext(bits(insn, 5, 14), 14);
        return format!("{name} {}, #{bit}, {:#x}", xr(bits(insn, 0, 5)), target(off));
    }
    match insn & 0xFFFF_FC1F {
        0xD61F_0000 => format!("br {}", xr(bits(insn, 5, 5))),
        0xD63F_0000 => format!("blr {}", xr(bits(insn, 5, 5))),
        0xD65F_0000 => format!("ret {}", xr(bits(insn, 5, 5))),
        _ => format!(".word {insn:#010x}"),
    }
}

// -- Loads and stores --

fn disasm_ldst(insn: u32) -> String {
    // Only the general-register immediate forms.
    if bits(insn, 27, 3) != 0b111 || bits(insn, 26, 1) != 0 {
        return format!(".word {insn:#010x}");
    }
    let size = bits(insn, 30, 2);
    let opc = bits(insn, 22, 2);
    let rt = bits(insn, 0, 5);
    let rn = bits(insn, 5, 5);
    let (name, sf) = match (opc, size) {
        (0, 0) => ("strb", false),
        (0, 1) => ("strh", false),
        (0, 2) => ("str", false),
        (0, _) => ("str", true),
        (1, 0) => ("ldrb", false),
        (1, 1) => ("ldrh", false),
        (1, 2) => ("ldr", false),
        (1, _) => ("ldr", true),
        (2, 0) => ("ldrsb", true),
        (2, 1) => ("ldrsh", true),
        (2, 2) => ("ldrsw", true),
        (3, 0) => ("ldrsb", false),
        (3, 1) => ("ldrsh", false),
        _ => return format!(".word {insn:#010x}"),
    };
    let t = reg(sf, rt, true);
    let base = reg(true, rn, false);
    if bits(insn, 24, 1) == 1 {
        let off = bits(insn, 10, 12) << size;
        return if off == 0 {
            format!("{name} {t}, [{base}]")
        } else {
            format!("{name} {t}, [{base}, #{off}]")
        };
    }
    if bits(insn, 21, 1) != 0 {
        return format!(".word {insn:#010x}");
    }
    let imm9 = sign_ext(bits(insn, 12, 9), 9);
    match bits(insn, 10, 2) {
        0b00 => {
            let unscaled = match name {
                "str" => "stur",
                "strb" => "sturb",
                "strh" => "sturh",
                "ldr" => "ldur",
                "ldrb" => "ldurb",
                "ldrh" => "ldurh",
                "ldrsb" => "ldursb",
                "ldrsh" => "ldursh",
                _ => "ldursw",
            };
            format!("{unscaled} {t}, [{base}, #{imm9}]")
        }
        0b01 => format!("{name} {t}, [{base}], #{imm9}"),
        0b11 => format!("{name} {t}, [{base}, #{imm9}]!"),
        _ => format!(".word {insn:#010x}"),
    }
}

// -- Data processing (register) --

const SHIFT: [&str; 4] = ["lsl", "lsr", "asr", "ror"];

fn shifted(sf: bool, rm: u32, shift: u32, amount: u32) -> String {
    if amount == 0 {
        reg(sf, rm, true)
    } else {
        format!("{}, {} #{amount}", reg(sf, rm, true), SHIFT[shift as usize])
    }
}

fn disasm_dp_reg(insn: u32) -> String {
    let sf = insn >> 31 == 1;
    let rd = bits(insn, 0, 5);
    let rn = bits(insn, 5, 5);
    let rm = bits(insn, 16, 5);
    let imm6 = bits(insn, 10, 6);
    let shift = bits(insn, 22, 2);
    let (d, n) = (reg(sf, rd, true), reg(sf, rn, true));

    // Logical (shifted register)
    if insn & 0x1F00_0000 == 0x0A00_0000 {
        let opc = bits(insn, 29, 2);
        let inv = bits(insn, 21, 1);
        let m = shifted(sf, rm, shift, imm6);
        return match (opc, inv) {
            (1, 0) if rn == 31 && imm6 == 0 => format!("mov {d}, {}", reg(sf, rm, true)),
            (1, 1) if rn == 31 => format!("mvn {d}, {m}"),
            (3, 0) if rd == 31 => format!("tst {n}, {m}"),
            _ => {
                let name = [["and", "bic"], ["orr", "orn"], ["eor", "eon"], ["ands", "bics"]][opc as usize]
                    [inv as usize];
                format!("{name} {d}, {n}, {m}")
            }
        };
    }
    // Add/subtract (shifted register)
    if insn & 0x1F20_0000 == 0x0B00_0000 {
        let op = bits(insn, 30, 1);
        let s = bits(insn, 29, 1) == 1;
        let m = shifted(sf, rm, shift, imm6);
        if s && rd == 31 {
            let alias = if op == 0 { "cmn" } else { "cmp" };
            return format!("{alias} {n}, {m}");
        }
        if op == 1 && rn == 31 {
            let name = if s { "negs" } else { "neg" };
            return format!("{name} {d}, {m}");
        }
        let name = match (op, s) {
            (0, false) => "add",
            (0, true) => "adds",
            (_, false) => "sub",
            (_, true) => "subs",
        };
        return format!("{name} {d}, {n}, {m}");
    }
    // Add/subtract with carry
    if insn & 0x1FE0_FC00 == 0x1A00_0000 {
        let name = ["adc", "adcs", "sbc", "sbcs"][bits(insn, 29, 2) as usize];
        return format!("{name} {d}, {n}, {}", reg(sf, rm, true));
    }
    // Conditional select
    if insn & 0x1FE0_0800 == 0x1A80_0000 {
        let op = (bits(insn, 30, 1) << 1) | bits(insn, 10, 1);
        let cond = bits(insn, 12, 4);
        if op == 1 && rn == 31 && rm == 31 {
            return format!("cset {d}, {}", COND[(cond ^ 1) as usize]);
        }
        let name = ["csel", "csinc", "csinv", "csneg"][op as usize];
        return format!("{name} {d}, {n}, {}, {}", reg(sf, rm, true), COND[cond as usize]);
    }
    // Data processing (2 source), including CRC32C
    if insn & 0x5FE0_0000 == 0x1AC0_0000 {
        let opcode = bits(insn, 10, 6);
        let m = reg(sf, rm, true);
        return match opcode {
            0x02 => format!("udiv {d}, {n}, {m}"),
            0x03 => format!("sdiv {d}, {n}, {m}"),
            0x08 => format!("lsl {d}, {n}, {m}"),
            0x09 => format!("lsr {d}, {n}, {m}"),
            0x0A => format!("asr {d}, {n}, {m}"),
            0x0B => format!("ror {d}, {n}, {m}"),
            0x14..=0x17 => {
                let suffix = ["b", "h", "w", "x"][(opcode & 3) as usize];
                format!(
                    "crc32c{suffix} {}, {}, {m}",
                    reg(false, rd, true),
                    reg(false, rn, true)
                )
            }
            _ => format!(".word {insn:#010x}"),
        };
    }
    // Data processing (1 source)
    if insn & 0x5FFF_0000 == 0x5AC0_0000 {
        let name = match bits(insn, 10, 6) {
            0x00 => "rbit",
            0x01 => "rev16",
            0x02 if sf => "rev32",
            0x02 => "rev",
            0x03 => "rev",
            0x04 => "clz",
            0x05 => "cls",
            _ => return format!(".word {insn:#010x}"),
        };
        return format!("{name} {d}, {n}");
    }
    // Data processing (3 source)
    if insn & 0x1F00_0000 == 0x1B00_0000 {
        let ra = bits(insn, 10, 5);
        let o0 = bits(insn, 15, 1);
        let m = reg(sf, rm, true);
        return match (bits(insn, 21, 3), o0) {
            (0b000, 0) if ra == 31 => format!("mul {d}, {n}, {m}"),
            (0b000, 0) => format!("madd {d}, {n}, {m}, {}", reg(sf, ra, true)),
            (0b000, _) => format!("msub {d}, {n}, {m}, {}", reg(sf, ra, true)),
            (0b001, 0) | (0b101, 0) => {
                let name = if bits(insn, 23, 1) == 1 { "umaddl" } else { "smaddl" };
                let (wn, wm) = (reg(false, rn, true), reg(false, rm, true));
                if ra == 31 {
                    let short = if name == "umaddl" { "umull" } else { "smull" };
                    format!("{short} {}, {wn}, {wm}", xr(rd))
                } else {
                    format!("{name} {}, {wn}, {wm}, {}", xr(rd), xr(ra))
                }
            }
            (0b010, _) => format!("smulh {}, {}, {}", xr(rd), xr(rn), xr(rm)),
            (0b110, _) => format!("umulh {}, {}, {}", xr(rd), xr(rn), xr(rm)),
            _ => format!(".word {insn:#010x}"),
        };
    }
    format!(".word {insn:#010x}")
}
