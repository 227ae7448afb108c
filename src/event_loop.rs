//! The top-level cooperative dispatch loop.
use crate::extension::{self, Event};
use crate::lineedit::LineEvent;
use crate::shell::{self, ShellResponse};
use crate::signal_io::GpibBus;
use crate::timebase::{Clock, Deadline, SrqEdgeSource};
use crate::FirmwareContext;

/// Run one iteration of the main loop: compute events, dispatch the extension mode handler, feed the line editor and run the shell.
pub fn run_iteration<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>)
where
    B: GpibBus,
    C: Clock + SrqEdgeSource,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    let now_ms = ctx.clock.now_ms();

    // Rising-edge filtering: only a latched edge while SRQ is *currently*
    // asserted counts, debouncing ribbon-cable cross-talk.
    let srq_edge = ctx.clock.take_srq_edge() && ctx.bus.read_srq();
    let timeout_due = ctx.deadline.due(now_ms);

    if let Some(enable) = ctx.pending_ext_toggle.take() {
        let event = if enable { Event::ExtEnable } else { Event::ExtDisable };
        ctx.deadline = dispatch_extension(ctx, event, now_ms);
    } else if srq_edge {
        ctx.deadline = dispatch_extension(ctx, Event::Srq, now_ms);
    } else if timeout_due {
        ctx.deadline = dispatch_extension(ctx, Event::Timeout, now_ms);
    }

    if ctx.uart.bytes_pending() {
        if let Some(byte) = ctx.uart.read_byte() {
            if ctx.options.get(crate::nvconfig::OptionId::Echo) != 0 {
                ctx.uart.write_bytes(&[byte]);
            }
            match ctx.line_editor.feed(byte, &ctx.history) {
                LineEvent::Complete(len) => {
                    run_shell_line(ctx, len);
                }
                LineEvent::None => {}
            }
        }
    }
}

fn dispatch_extension<B, C, N, U, T, Led>(
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    event: Event,
    now_ms: u16,
) -> Deadline
where
    B: GpibBus,
    C: Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    extension::step(
        &mut ctx.extension,
        &ctx.instrument,
        &mut ctx.session,
        &mut ctx.bus,
        &ctx.clock,
        &mut ctx.tone,
        &ctx.options,
        event,
        now_ms,
    )
}

fn run_shell_line<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>, len: usize)
where
    B: GpibBus,
    C: Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    let mut line = [0u8; 80];
    let n = len.min(line.len());
    line[..n].copy_from_slice(&ctx.line_editor.buffer()[..n]);
    ctx.line_editor.take();

    let line_str = core::str::from_utf8(&line[..n]).unwrap_or("");
    if !line_str.is_empty() {
        ctx.history.push(line_str);
    }

    let mut out = [0u8; 256];
    let response = match shell::parse_command(&line[..n]) {
        Some((cmd, args)) => shell::dispatch(cmd, args, ctx, &mut out),
        None => ShellResponse::Error,
    };

    match response {
        ShellResponse::Ok => ctx.uart.write_bytes(b"OK\r\n"),
        ShellResponse::Timeout(count) => {
            ctx.uart.write_bytes(b"TIMEOUT ");
            let mut digits = [0u8; 5];
            let w = write_decimal(count as u16, &mut digits);
            ctx.uart.write_bytes(&digits[..w]);
            ctx.uart.write_bytes(b"\r\n");
        }
        ShellResponse::Error => ctx.uart.write_bytes(b"ERROR\r\n"),
        ShellResponse::Payload(written) => {
            ctx.uart.write_bytes(&out[..written]);
            ctx.uart.write_bytes(b"\r\n");
        }
    }
}

fn write_decimal(value: u16, out: &mut [u8]) -> usize {
    let mut digits = [0u8; 5];
    let mut n = 0;
    let mut v = value;
    loop {
        digits[n] = b'0' + (v % 10) as u8;
        v /= 10;
        n += 1;
        if v == 0 {
            break;
        }
    }
    let w = n.min(out.len());
    for i in 0..w {
        out[i] = digits[n - 1 - i];
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::MockUart;
    use crate::nvconfig::test_support::MapNvStore;
    use crate::nvconfig::Options;
    use crate::signal_io::test_support::*;
    use crate::timebase::SharedClock;
    use crate::tone_led::test_support::{RecordingLed, RecordingTone};

    fn fresh_ctx() -> FirmwareContext<TestPins, SharedClock, MapNvStore, MockUart, RecordingTone, RecordingLed> {
        let store = MapNvStore::default();
        let options = Options::load(&store);
        FirmwareContext::new(test_pins(), SharedClock::new(), store, options, MockUart::new(), RecordingTone::default(), RecordingLed::default(), 21, 23)
    }

    #[test]
    fn uart_byte_without_cr_only_echoes() {
        let mut ctx = fresh_ctx();
        ctx.uart.feed(b"R");
        run_iteration(&mut ctx);
        assert_eq!(ctx.uart.tx, b"R");
    }

    #[test]
    fn complete_line_runs_shell_and_responds_ok() {
        let mut ctx = fresh_ctx();
        ctx.uart.feed(b"R\r");
        run_iteration(&mut ctx);
        run_iteration(&mut ctx);
        assert_eq!(ctx.uart.tx, b"R\r\nOK\r\n");
    }

    #[test]
    fn unknown_command_responds_error() {
        let mut ctx = fresh_ctx();
        ctx.uart.feed(b"Z\r");
        run_iteration(&mut ctx);
        run_iteration(&mut ctx);
        assert_eq!(ctx.uart.tx, b"Z\r\nERROR\r\n");
    }
}
