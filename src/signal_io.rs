//! GPIB control-line and data-bus signal I/O.
//!
//! Lines are open-collector-equivalent: "asserted" is driven low, "released"
//! is high-impedance (or driven high on a push-pull board that emulates
//! open-collector in firmware). This module only knows about individual
//! lines and the data bus; handshake sequencing lives in [`crate::gpib_transport`].

use embedded_hal::delay::DelayNs;

/// One IEEE-488 control line, driven by the controller.
///
/// Implementors wrap a concrete GPIO pin. `is_asserted` reads the line back
/// (useful for lines other devices can also drive, e.g. NRFD/NDAC/DAV/SRQ).
pub trait GpibLine {
    fn assert(&mut self);
    fn release(&mut self);
    fn is_asserted(&mut self) -> bool;
}

/// SRQ is read-only from the controller's perspective.
pub trait GpibInput {
    fn is_asserted(&mut self) -> bool;
}

/// The 8-bit parallel data bus, direction-switchable between talker and listener roles.
pub trait DataBus {
    fn put(&mut self, byte: u8);
    fn get(&mut self) -> u8;
    fn set_direction_output(&mut self);
    fn set_direction_input(&mut self);
}

/// T7: ATN assertion must settle at least this long before the bus is
/// considered stable.
pub const ATN_SETTLE_NS: u32 = 500;

/// The full signal-I/O surface the transport/session/protocol layers are
/// written against, so they don't carry the ten-parameter generic list of
/// [`GpibPins`] through every function signature.
pub trait GpibBus {
    fn set_atn(&mut self, asserted: bool);
    fn set_ren(&mut self, asserted: bool);
    fn set_ifc(&mut self, asserted: bool);
    fn set_eoi(&mut self, asserted: bool);
    fn set_dav(&mut self, asserted: bool);
    fn set_nrfd(&mut self, asserted: bool);
    fn set_ndac(&mut self, asserted: bool);
    fn read_dav(&mut self) -> bool;
    fn read_ndac(&mut self) -> bool;
    fn read_nrfd(&mut self) -> bool;
    fn read_srq(&mut self) -> bool;
    fn read_eoi(&mut self) -> bool;
    fn data_put(&mut self, byte: u8);
    fn data_get(&mut self) -> u8;
    fn configure_talker(&mut self);
    fn configure_listener(&mut self);
    fn delay_us(&mut self, us: u32);
    fn delay_ms(&mut self, ms: u32);
}

impl<ATN, REN, IFC, EOI, DAV, NRFD, NDAC, SRQ, DATA, DLY> GpibBus
    for GpibPins<ATN, REN, IFC, EOI, DAV, NRFD, NDAC, SRQ, DATA, DLY>
where
    ATN: GpibLine,
    REN: GpibLine,
    IFC: GpibLine,
    EOI: GpibLine,
    DAV: GpibLine,
    NRFD: GpibLine,
    NDAC: GpibLine,
    SRQ: GpibInput,
    DATA: DataBus,
    DLY: DelayNs,
{
    fn set_atn(&mut self, asserted: bool) {
        GpibPins::set_atn(self, asserted)
    }
    fn set_ren(&mut self, asserted: bool) {
        GpibPins::set_ren(self, asserted)
    }
    fn set_ifc(&mut self, asserted: bool) {
        GpibPins::set_ifc(self, asserted)
    }
    fn set_eoi(&mut self, asserted: bool) {
        GpibPins::set_eoi(self, asserted)
    }
    fn set_dav(&mut self, asserted: bool) {
        GpibPins::set_dav(self, asserted)
    }
    fn set_nrfd(&mut self, asserted: bool) {
        GpibPins::set_nrfd(self, asserted)
    }
    fn set_ndac(&mut self, asserted: bool) {
        GpibPins::set_ndac(self, asserted)
    }
    fn read_dav(&mut self) -> bool {
        GpibPins::read_dav(self)
    }
    fn read_ndac(&mut self) -> bool {
        GpibPins::read_ndac(self)
    }
    fn read_nrfd(&mut self) -> bool {
        GpibPins::read_nrfd(self)
    }
    fn read_srq(&mut self) -> bool {
        GpibPins::read_srq(self)
    }
    fn read_eoi(&mut self) -> bool {
        GpibPins::read_eoi(self)
    }
    fn data_put(&mut self, byte: u8) {
        GpibPins::data_put(self, byte)
    }
    fn data_get(&mut self) -> u8 {
        GpibPins::data_get(self)
    }
    fn configure_talker(&mut self) {
        GpibPins::configure_talker(self)
    }
    fn configure_listener(&mut self) {
        GpibPins::configure_listener(self)
    }
    fn delay_us(&mut self, us: u32) {
        GpibPins::delay_us(self, us)
    }
    fn delay_ms(&mut self, ms: u32) {
        GpibPins::delay_ms(self, ms)
    }
}

/// The full set of physical lines plus a delay source, generic over
/// whatever embedded-hal-backed types the board provides.
pub struct GpibPins<ATN, REN, IFC, EOI, DAV, NRFD, NDAC, SRQ, DATA, DLY>
where
    ATN: GpibLine,
    REN: GpibLine,
    IFC: GpibLine,
    EOI: GpibLine,
    DAV: GpibLine,
    NRFD: GpibLine,
    NDAC: GpibLine,
    SRQ: GpibInput,
    DATA: DataBus,
    DLY: DelayNs,
{
    pub atn: ATN,
    pub ren: REN,
    pub ifc: IFC,
    pub eoi: EOI,
    pub dav: DAV,
    pub nrfd: NRFD,
    pub ndac: NDAC,
    pub srq: SRQ,
    pub data: DATA,
    pub delay: DLY,
}

impl<ATN, REN, IFC, EOI, DAV, NRFD, NDAC, SRQ, DATA, DLY>
    GpibPins<ATN, REN, IFC, EOI, DAV, NRFD, NDAC, SRQ, DATA, DLY>
where
    ATN: GpibLine,
    REN: GpibLine,
    IFC: GpibLine,
    EOI: GpibLine,
    DAV: GpibLine,
    NRFD: GpibLine,
    NDAC: GpibLine,
    SRQ: GpibInput,
    DATA: DataBus,
    DLY: DelayNs,
{
    pub fn set_atn(&mut self, asserted: bool) {
        if asserted {
            self.atn.assert();
            self.delay.delay_ns(ATN_SETTLE_NS);
        } else {
            self.atn.release();
        }
    }

    pub fn set_ren(&mut self, asserted: bool) {
        if asserted {
            self.ren.assert();
        } else {
            self.ren.release();
        }
    }

    pub fn set_ifc(&mut self, asserted: bool) {
        if asserted {
            self.ifc.assert();
        } else {
            self.ifc.release();
        }
    }

    pub fn set_eoi(&mut self, asserted: bool) {
        if asserted {
            self.eoi.assert();
        } else {
            self.eoi.release();
        }
    }

    pub fn set_dav(&mut self, asserted: bool) {
        if asserted {
            self.dav.assert();
        } else {
            self.dav.release();
        }
    }

    pub fn set_nrfd(&mut self, asserted: bool) {
        if asserted {
            self.nrfd.assert();
        } else {
            self.nrfd.release();
        }
    }

    pub fn set_ndac(&mut self, asserted: bool) {
        if asserted {
            self.ndac.assert();
        } else {
            self.ndac.release();
        }
    }

    pub fn read_dav(&mut self) -> bool {
        self.dav.is_asserted()
    }

    pub fn read_ndac(&mut self) -> bool {
        self.ndac.is_asserted()
    }

    pub fn read_nrfd(&mut self) -> bool {
        self.nrfd.is_asserted()
    }

    pub fn read_srq(&mut self) -> bool {
        self.srq.is_asserted()
    }

    pub fn read_eoi(&mut self) -> bool {
        self.eoi.is_asserted()
    }

    pub fn data_put(&mut self, byte: u8) {
        self.data.put(byte)
    }

    pub fn data_get(&mut self) -> u8 {
        self.data.get()
    }

    /// Configure the data lines (and handshake expectations) for this
    /// controller to drive the bus as talker.
    pub fn configure_talker(&mut self) {
        self.data.set_direction_output();
    }

    /// Configure the data lines for this controller to receive as listener.
    pub fn configure_listener(&mut self) {
        self.data.set_direction_input();
    }

    pub fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

#[cfg(test)]
pub mod test_support {
    //! A fully in-memory bus used by the transport/session/protocol unit
    //! tests elsewhere in this crate. Not part of the public API.
    use super::*;
    use core::cell::Cell;

    #[derive(Default)]
    pub struct TestLine {
        pub asserted: Cell<bool>,
    }

    impl GpibLine for TestLine {
        fn assert(&mut self) {
            self.asserted.set(true);
        }
        fn release(&mut self) {
            self.asserted.set(false);
        }
        fn is_asserted(&mut self) -> bool {
            self.asserted.get()
        }
    }

    impl GpibInput for TestLine {
        fn is_asserted(&mut self) -> bool {
            self.asserted.get()
        }
    }

    #[derive(Default)]
    pub struct TestDataBus {
        pub value: u8,
        pub is_output: bool,
    }

    impl DataBus for TestDataBus {
        fn put(&mut self, byte: u8) {
            self.value = byte;
        }
        fn get(&mut self) -> u8 {
            self.value
        }
        fn set_direction_output(&mut self) {
            self.is_output = true;
        }
        fn set_direction_input(&mut self) {
            self.is_output = false;
        }
    }

    #[derive(Default)]
    pub struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    pub type TestPins =
        GpibPins<TestLine, TestLine, TestLine, TestLine, TestLine, TestLine, TestLine, TestLine, TestDataBus, NoDelay>;

    pub fn test_pins() -> TestPins {
        GpibPins {
            atn: TestLine::default(),
            ren: TestLine::default(),
            ifc: TestLine::default(),
            eoi: TestLine::default(),
            dav: TestLine::default(),
            nrfd: TestLine::default(),
            ndac: TestLine::default(),
            srq: TestLine::default(),
            data: TestDataBus::default(),
            delay: NoDelay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn set_atn_asserts_and_settles() {
        let mut pins = test_pins();
        pins.set_atn(true);
        assert!(pins.atn.asserted.get());
        pins.set_atn(false);
        assert!(!pins.atn.asserted.get());
    }

    #[test]
    fn data_put_get_roundtrip() {
        let mut pins = test_pins();
        pins.configure_talker();
        pins.data_put(0xA5);
        assert_eq!(pins.data_get(), 0xA5);
    }
}
