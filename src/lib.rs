//! GPIB bridge and SRQ-driven extension firmware for the HP-3478A bench
//! multimeter.
//!
//! This crate is the bus controller half of the bridge: a GPIB signal and
//! byte-transport layer, a typed driver for the instrument's command set,
//! an SRQ-driven extension state machine that adds continuity/relative/
//! auto-hold/min-max/temperature modes the instrument doesn't have on its
//! own, and a serial shell that exposes the GPIB bus directly to a host.

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod event_loop;
pub mod extension;
pub mod gpib_session;
pub mod gpib_transport;
pub mod history;
pub mod hp3478a;
pub mod io;
pub mod lineedit;
pub mod menu;
pub mod nvconfig;
pub mod reading;
pub mod shell;
pub mod signal_io;
pub mod timebase;
pub mod tone_led;

use gpib_session::Session;
use history::History;
use hp3478a::Instrument;
use io::UartIo;
use lineedit::LineEditor;
use nvconfig::{NvStore, Options};
use signal_io::GpibBus;
use timebase::{Clock, Deadline};
use tone_led::{StatusLed, ToneGen};

/// The single long-lived context value the event loop, shell, and extension machine all operate on.
pub struct FirmwareContext<B, C, N, U, T, Led>
where
    B: GpibBus,
    C: Clock,
    N: NvStore,
    U: UartIo,
    T: ToneGen,
    Led: StatusLed,
{
    pub bus: B,
    pub clock: C,
    pub nvstore: N,
    pub uart: U,
    pub tone: T,
    pub led: Led,

    pub session: Session,
    pub instrument: Instrument,
    pub options: Options,
    pub history: History,
    pub line_editor: LineEditor,
    pub extension: extension::ExtensionContext,
    pub deadline: Deadline,
    /// Set by the shell when the extension-enable option changes;
    /// consumed (and cleared) by the next `run_iteration` as a one-shot
    /// `EXT_ENABLE`/`EXT_DISABLE` event.
    pub pending_ext_toggle: Option<bool>,
}

impl<B, C, N, U, T, Led> FirmwareContext<B, C, N, U, T, Led>
where
    B: GpibBus,
    C: Clock,
    N: NvStore,
    U: UartIo,
    T: ToneGen,
    Led: StatusLed,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: B,
        clock: C,
        nvstore: N,
        options: Options,
        uart: U,
        tone: T,
        led: Led,
        converter_addr: u8,
        instrument_addr: u8,
    ) -> Self {
        Self {
            bus,
            clock,
            nvstore,
            uart,
            tone,
            led,
            session: Session::new(converter_addr),
            instrument: Instrument::new(instrument_addr),
            options,
            history: History::new(),
            line_editor: LineEditor::new(true),
            extension: extension::ExtensionContext::new(),
            deadline: Deadline::Never,
            pending_ext_toggle: None,
        }
    }
}
