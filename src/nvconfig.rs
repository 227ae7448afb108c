//! Persistent configuration storage.
//!
//! The nonvolatile medium itself is external glue; this module
//! specifies only the interface it's accessed through, the option table,
//! and the in-memory `Options` copy the shell and extension machine read
//! and write.

use crate::error::BridgeError;

/// What the option store needs from the underlying nonvolatile medium.
/// The medium itself is out of scope; only this interface is.
pub trait NvStore {
    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), BridgeError>;
    fn write(&mut self, addr: u16, buf: &[u8]) -> Result<(), BridgeError>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum OptionWidth {
    Byte,
    Word,
}

/// One row of the configuration table.
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub width: OptionWidth,
    pub max: u16,
    pub default: u16,
    pub nv_addr: u16,
}

/// Index into [`OPTIONS`] / [`Options`]'s backing array, in declaration
/// order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(usize)]
pub enum OptionId {
    ExtensionEnable = 0,
    Echo,
    ConverterAddress,
    InstrumentAddress,
    EolMask,
    BaudRate,
    InitialMode,
    BuzzerPeriod,
    BuzzerDuty,
    ContinuityThreshold,
    ContinuityRange,
    ContinuityLatch,
    ContinuityBeepLow,
    ContinuityBeepHigh,
}

pub const OPTION_COUNT: usize = 14;

/// `RX/TX EOL mask` bit assignment: `EOI=4, LF=2, CR=1`.
pub mod eol_mask {
    pub const EOI: u16 = 0b100;
    pub const LF: u16 = 0b010;
    pub const CR: u16 = 0b001;
}

const fn byte_addr(n: u16) -> u16 {
    n
}
const fn word_addr(n: u16) -> u16 {
    0x0100 + n * 2
}

/// Table of every option's shape, persistence address, and factory
/// default. Indexed by [`OptionId as usize`].
pub static OPTIONS: [OptionSpec; OPTION_COUNT] = [
    OptionSpec { name: "extension enable", width: OptionWidth::Byte, max: 1, default: 1, nv_addr: byte_addr(0) },
    OptionSpec { name: "echo", width: OptionWidth::Byte, max: 1, default: 1, nv_addr: byte_addr(1) },
    OptionSpec { name: "converter address", width: OptionWidth::Byte, max: 30, default: 21, nv_addr: byte_addr(2) },
    OptionSpec { name: "instrument address", width: OptionWidth::Byte, max: 31, default: 23, nv_addr: byte_addr(3) },
    OptionSpec { name: "eol mask", width: OptionWidth::Byte, max: 7, default: 0b011, nv_addr: byte_addr(4) },
    OptionSpec { name: "baud rate", width: OptionWidth::Byte, max: 4, default: 0, nv_addr: byte_addr(5) },
    OptionSpec { name: "initial mode", width: OptionWidth::Word, max: 0xFFFF, default: 0, nv_addr: word_addr(0) },
    OptionSpec { name: "buzzer period", width: OptionWidth::Word, max: 0xFFFF, default: 500, nv_addr: word_addr(1) },
    OptionSpec { name: "buzzer duty", width: OptionWidth::Byte, max: 100, default: 50, nv_addr: byte_addr(6) },
    OptionSpec { name: "continuity threshold", width: OptionWidth::Word, max: 0xFFFF, default: 100, nv_addr: word_addr(2) },
    OptionSpec { name: "continuity range", width: OptionWidth::Byte, max: 7, default: 0, nv_addr: byte_addr(7) },
    OptionSpec { name: "continuity latch", width: OptionWidth::Byte, max: 255, default: 10, nv_addr: byte_addr(8) },
    OptionSpec { name: "continuity beep low", width: OptionWidth::Word, max: 0xFFFF, default: 50, nv_addr: word_addr(3) },
    OptionSpec { name: "continuity beep high", width: OptionWidth::Word, max: 0xFFFF, default: 2000, nv_addr: word_addr(4) },
];

/// The live in-memory copy of every option, loaded at boot and on preset load.
pub struct Options {
    values: [u16; OPTION_COUNT],
}

impl Options {
    /// Load every option from `store`, replacing out-of-range or unwritten (`0xFF`/`0xFFFF`) values with the factory default.
    pub fn load(store: &dyn NvStore) -> Self {
        let mut values = [0u16; OPTION_COUNT];
        for (i, spec) in OPTIONS.iter().enumerate() {
            values[i] = read_one(store, spec).unwrap_or(spec.default);
        }
        Self { values }
    }

    pub fn get(&self, id: OptionId) -> u16 {
        self.values[id as usize]
    }

    /// Set the live value, optionally persisting it. Rejects writes outside `[0, max]`, leaving the live value unchanged.
    pub fn set(&mut self, store: &mut dyn NvStore, id: OptionId, value: u16, persist: bool) -> Result<(), BridgeError> {
        let spec = &OPTIONS[id as usize];
        if value > spec.max {
            return Err(BridgeError::Config);
        }
        self.values[id as usize] = value;
        if persist {
            write_one(store, spec, value)?;
        }
        Ok(())
    }

    /// `O0`/`O1` shortcuts: apply the factory defaults wholesale, for
    /// interactive (`interactive = true`) or non-interactive operation.
    /// Non-interactive additionally forces echo and the prompt off.
    pub fn factory_reset(&mut self, store: &mut dyn NvStore, interactive: bool) -> Result<(), BridgeError> {
        for (i, spec) in OPTIONS.iter().enumerate() {
            self.values[i] = spec.default;
        }
        if !interactive {
            self.values[OptionId::Echo as usize] = 0;
        }
        for (i, spec) in OPTIONS.iter().enumerate() {
            write_one(store, spec, self.values[i])?;
        }
        Ok(())
    }
}

fn read_one(store: &dyn NvStore, spec: &OptionSpec) -> Option<u16> {
    match spec.width {
        OptionWidth::Byte => {
            let mut buf = [0u8; 1];
            store.read(spec.nv_addr, &mut buf).ok()?;
            if buf[0] == 0xFF {
                return None;
            }
            let v = buf[0] as u16;
            (v <= spec.max).then_some(v)
        }
        OptionWidth::Word => {
            let mut buf = [0u8; 2];
            store.read(spec.nv_addr, &mut buf).ok()?;
            if buf == [0xFF, 0xFF] {
                return None;
            }
            let v = u16::from_le_bytes(buf);
            (v <= spec.max).then_some(v)
        }
    }
}

fn write_one(store: &mut dyn NvStore, spec: &OptionSpec, value: u16) -> Result<(), BridgeError> {
    match spec.width {
        OptionWidth::Byte => store.write(spec.nv_addr, &[value as u8]),
        OptionWidth::Word => store.write(spec.nv_addr, &value.to_le_bytes()),
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MapNvStore {
        cells: HashMap<u16, u8>,
    }

    impl NvStore for MapNvStore {
        fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), BridgeError> {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = *self.cells.get(&(addr + i as u16)).unwrap_or(&0xFF);
            }
            Ok(())
        }

        fn write(&mut self, addr: u16, buf: &[u8]) -> Result<(), BridgeError> {
            for (i, &byte) in buf.iter().enumerate() {
                self.cells.insert(addr + i as u16, byte);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MapNvStore;
    use super::*;

    #[test]
    fn unwritten_store_loads_factory_defaults() {
        let store = MapNvStore::default();
        let options = Options::load(&store);
        assert_eq!(options.get(OptionId::ConverterAddress), 21);
        assert_eq!(options.get(OptionId::BuzzerPeriod), 500);
    }

    #[test]
    fn out_of_range_stored_value_falls_back_to_default() {
        let mut store = MapNvStore::default();
        store.write(OPTIONS[OptionId::InstrumentAddress as usize].nv_addr, &[99]).unwrap();
        let options = Options::load(&store);
        assert_eq!(options.get(OptionId::InstrumentAddress), 23);
    }

    #[test]
    fn set_rejects_value_above_max() {
        let mut store = MapNvStore::default();
        let mut options = Options::load(&store);
        let err = options.set(&mut store, OptionId::Echo, 5, false).unwrap_err();
        assert_eq!(err, BridgeError::Config);
        assert_eq!(options.get(OptionId::Echo), 1);
    }

    #[test]
    fn set_with_persist_round_trips_through_store() {
        let mut store = MapNvStore::default();
        let mut options = Options::load(&store);
        options.set(&mut store, OptionId::ConverterAddress, 5, true).unwrap();
        let reloaded = Options::load(&store);
        assert_eq!(reloaded.get(OptionId::ConverterAddress), 5);
    }

    #[test]
    fn factory_reset_non_interactive_forces_echo_off() {
        let mut store = MapNvStore::default();
        let mut options = Options::load(&store);
        options.set(&mut store, OptionId::Echo, 1, true).unwrap();
        options.factory_reset(&mut store, false).unwrap();
        assert_eq!(options.get(OptionId::Echo), 0);
    }
}
