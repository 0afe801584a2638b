/// Translation category of a guest instruction.
///
/// Classification tries the categories in [`Category::PRIORITY`] order
/// and the first matching predicate wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Integer arithmetic, logic, shifts, compare and test.
    Arith,
    /// Data movement: moves, extensions, LEA, stack push/pop, exchange.
    Memory,
    /// Branches, calls, returns and condition-consuming moves/sets.
    ControlFlow,
    /// Bit scans, counts, bit tests, byte swap, double shifts, CRC32.
    Bit,
    /// MOVS/STOS/LODS/CMPS/SCAS with optional repeat prefixes.
    String,
    /// NOPs, sign-extension of rAX, and system instructions.
    Misc,
    Unknown,
}

impl Category {
    /// Order in which category predicates are tried.
    pub const PRIORITY: [Category; 6] = [
        Category::Arith,
        Category::Memory,
        Category::ControlFlow,
        Category::Bit,
        Category::String,
        Category::Misc,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Category::Arith => "arith",
            Category::Memory => "memory",
            Category::ControlFlow => "control-flow",
            Category::Bit => "bit",
            Category::String => "string",
            Category::Misc => "misc",
            Category::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
