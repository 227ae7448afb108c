//! The front-panel menu: entry selection and its range-dependent entry
//! point.
use crate::hp3478a::{Function, InstrumentStatus};

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum MenuEntry {
    Continuity,
    ExtOhm,
    Diode,
    AutoHold,
    MinMax,
    Temperature,
    PresetSave,
    PresetLoad,
}

/// Cycle order the menu advances through on each FRPSRQ while open.
const ORDER: [MenuEntry; 8] = [
    MenuEntry::Continuity,
    MenuEntry::ExtOhm,
    MenuEntry::Diode,
    MenuEntry::AutoHold,
    MenuEntry::MinMax,
    MenuEntry::Temperature,
    MenuEntry::PresetSave,
    MenuEntry::PresetLoad,
];

fn index_of(entry: MenuEntry) -> usize {
    ORDER.iter().position(|&e| e == entry).unwrap_or(0)
}

/// Advance the cursor one position, wrapping around.
pub fn next(current: MenuEntry) -> MenuEntry {
    ORDER[(index_of(current) + 1) % ORDER.len()]
}

/// The entry point the menu opens on, which depends on the instrument's function/range at the moment the menu was entered.
pub fn entry_point(status: &InstrumentStatus, is_overload: bool) -> MenuEntry {
    match status.function_range_digits.function {
        Function::Ohm2W if is_overload => MenuEntry::ExtOhm,
        Function::Ohm2W => MenuEntry::Continuity,
        Function::OhmExtended => MenuEntry::ExtOhm,
        _ => MenuEntry::AutoHold,
    }
}

/// The string shown on the 3478A display while this entry is highlighted.
pub fn display_string(entry: MenuEntry) -> &'static str {
    match entry {
        MenuEntry::Continuity => "CONT",
        MenuEntry::ExtOhm => "XOHM",
        MenuEntry::Diode => "DIODE",
        MenuEntry::AutoHold => "AUTOHOLD",
        MenuEntry::MinMax => "MINMAX",
        MenuEntry::Temperature => "TEMP",
        MenuEntry::PresetSave => "PSAVE",
        MenuEntry::PresetLoad => "PLOAD",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hp3478a::{Digits, FunctionRangeDigits, Modes, StatusByte};

    fn status_for(function: Function) -> InstrumentStatus {
        InstrumentStatus {
            function_range_digits: FunctionRangeDigits { function, range: 0, digits: Digits::D4_5 },
            modes: Modes::empty(),
            srq_mask: 0,
            status: StatusByte::empty(),
            reserved: 0,
        }
    }

    #[test]
    fn cycle_wraps_around() {
        assert_eq!(next(MenuEntry::PresetLoad), MenuEntry::Continuity);
        assert_eq!(next(MenuEntry::Continuity), MenuEntry::ExtOhm);
    }

    #[test]
    fn entry_point_depends_on_function_and_overload() {
        assert_eq!(entry_point(&status_for(Function::Ohm2W), true), MenuEntry::ExtOhm);
        assert_eq!(entry_point(&status_for(Function::Ohm2W), false), MenuEntry::Continuity);
        assert_eq!(entry_point(&status_for(Function::OhmExtended), false), MenuEntry::ExtOhm);
        assert_eq!(entry_point(&status_for(Function::DcV), false), MenuEntry::AutoHold);
    }
}
