use std::io::Write;

use tracing::{debug, info};

use crate::bus::{Bus, Claim};
use crate::descriptor::{ModelDescriptor, Params};
use crate::error::ModelError;
use crate::model::{ModelFactory, SteppedModel};
use crate::uart::{DEFAULT_BIT_PERIOD, UartDecoder, UartEncoder};

/// Memory-mapped LED register driven by the `io_write` firmware.
pub const LED_ADDR: u64 = 0x8000_0000;
/// TX line shared by `uart_tx` and `uart_console`.
pub const UART_TX_ADDR: u64 = 0x1000_0000;

/// Busy-wait length of the `io_write` firmware between bursts.
const LED_DEFAULT_DELAY: u64 = 65_535;
/// The firmware counts `value` from 0 while `value < 0xff`.
const LED_BURST_END: u64 = 0xff;

/// Every model kind [`BuiltinModels`] can construct, with a short description.
pub const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("led_writer", "io_write firmware: bursts 0..0xfe to the LED register, then idles"),
    ("led_monitor", "samples the LED register and counts value changes"),
    ("finish_after", "raises $finish after `cycles` steps"),
    ("uart_tx", "shifts `message` out 8N1 on the UART TX line"),
    ("uart_console", "decodes the UART TX line and echoes bytes to stdout"),
];

/// Factory for the built-in models, all attached to one shared [`Bus`].
#[derive(Debug, Clone, Default)]
pub struct BuiltinModels {
    bus: Bus,
}

impl BuiltinModels {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

impl ModelFactory for BuiltinModels {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn SteppedModel>, ModelError> {
        let name = descriptor.display_name();
        let params = &descriptor.params;
        let model: Box<dyn SteppedModel> = match descriptor.kind.as_str() {
            "led_writer" => Box::new(LedWriter::new(name, &self.bus, params)?),
            "led_monitor" => Box::new(LedMonitor::new(name, &self.bus, params)?),
            "finish_after" => Box::new(FinishAfter::new(name, params)?),
            "uart_tx" => Box::new(UartTx::new(name, &self.bus, params)?),
            "uart_console" => Box::new(UartConsole::new(name, &self.bus, params)?),
            other => return Err(ModelError::UnknownKind(other.to_owned())),
        };
        Ok(model)
    }
}

fn bit_period(params: &Params) -> Result<u32, ModelError> {
    let period = params.u64_or("bit_period", u64::from(DEFAULT_BIT_PERIOD))?;
    match u32::try_from(period) {
        Ok(p) if p >= 2 => Ok(p),
        _ => Err(ModelError::InvalidParam {
            param: "bit_period",
            reason: format!("{period} is out of range (2..=u32::MAX)"),
        }),
    }
}

/// Claim `len` words from `start`, rejecting ranges past the end of the
/// address space.
fn claim_words(
    bus: &Bus,
    owner: &str,
    param: &'static str,
    start: u64,
    len: u64,
) -> Result<Claim, ModelError> {
    let end = start.checked_add(len).ok_or_else(|| ModelError::InvalidParam {
        param,
        reason: format!("0x{start:x} leaves no room for {len} word(s)"),
    })?;
    bus.claim(owner, start..end)
}

/// Rust rendition of the `io_write` client program: write 0..0xfe to the LED
/// register, one store per tick, then spin for `delay` ticks. Forever.
pub struct LedWriter {
    name: String,
    bus: Bus,
    addr: u64,
    delay: u64,
    value: u64,
    idle: u64,
    writes: u64,
    _claim: Claim,
}

impl LedWriter {
    pub fn new(name: &str, bus: &Bus, params: &Params) -> Result<Self, ModelError> {
        let addr = params.u64_or("addr", LED_ADDR)?;
        let delay = params.u64_or("delay", LED_DEFAULT_DELAY)?;
        let claim = claim_words(bus, name, "addr", addr, 8)?;
        Ok(Self {
            name: name.to_owned(),
            bus: bus.clone(),
            addr,
            delay,
            value: 0,
            idle: 0,
            writes: 0,
            _claim: claim,
        })
    }
}

impl SteppedModel for LedWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        if self.idle > 0 {
            self.idle -= 1;
            return Ok(());
        }
        self.bus.write(self.addr, self.value);
        self.writes += 1;
        self.value += 1;
        if self.value >= LED_BURST_END {
            self.value = 0;
            self.idle = self.delay;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        false
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        info!(model = %self.name, writes = self.writes, "LED writer stopped");
        Ok(())
    }
}

pub struct LedMonitor {
    name: String,
    bus: Bus,
    addr: u64,
    last: Option<u64>,
    changes: u64,
    until: Option<u64>,
}

impl LedMonitor {
    pub fn new(name: &str, bus: &Bus, params: &Params) -> Result<Self, ModelError> {
        Ok(Self {
            name: name.to_owned(),
            bus: bus.clone(),
            addr: params.u64_or("addr", LED_ADDR)?,
            last: None,
            changes: 0,
            until: params.u64("changes")?,
        })
    }
}

impl SteppedModel for LedMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        let current = self.bus.read(self.addr);
        if current != self.last {
            if current.is_some() {
                self.changes += 1;
            }
            self.last = current;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.until.is_some_and(|until| self.changes >= until)
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        info!(model = %self.name, changes = self.changes, last = ?self.last, "LED activity");
        Ok(())
    }
}

/// Stand-in for an HDL `$finish`: done once `cycles` steps have run.
pub struct FinishAfter {
    name: String,
    cycles: u64,
    elapsed: u64,
}

impl FinishAfter {
    pub fn new(name: &str, params: &Params) -> Result<Self, ModelError> {
        Ok(Self {
            name: name.to_owned(),
            cycles: params.require_u64("cycles")?,
            elapsed: 0,
        })
    }
}

impl SteppedModel for FinishAfter {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        self.elapsed += 1;
        if self.elapsed == self.cycles {
            debug!(model = %self.name, cycle = self.elapsed, "$finish");
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.cycles
    }
}

pub struct UartTx {
    name: String,
    bus: Bus,
    line: u64,
    encoder: UartEncoder,
    finish: bool,
    _claim: Claim,
}

impl UartTx {
    pub fn new(name: &str, bus: &Bus, params: &Params) -> Result<Self, ModelError> {
        let line = params.u64_or("line", UART_TX_ADDR)?;
        let message = params.text("message")?.unwrap_or_default();
        let encoder = UartEncoder::new(message.as_bytes(), bit_period(params)?);
        let claim = claim_words(bus, name, "line", line, 1)?;
        bus.write(line, 1);
        Ok(Self {
            name: name.to_owned(),
            bus: bus.clone(),
            line,
            encoder,
            finish: params.bool_or("finish", false)?,
            _claim: claim,
        })
    }
}

impl SteppedModel for UartTx {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        let level = self.encoder.next_level();
        self.bus.write(self.line, u64::from(level));
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.finish && self.encoder.is_finished()
    }
}

pub struct UartConsole {
    name: String,
    bus: Bus,
    line: u64,
    decoder: UartDecoder,
    until: Option<u8>,
    echo: bool,
    received: u64,
    pending_line: Vec<u8>,
    seen_until: bool,
}

impl UartConsole {
    pub fn new(name: &str, bus: &Bus, params: &Params) -> Result<Self, ModelError> {
        let until = params
            .u64("until")?
            .map(|byte| {
                u8::try_from(byte).map_err(|_| ModelError::InvalidParam {
                    param: "until",
                    reason: format!("{byte} is not a byte"),
                })
            })
            .transpose()?;
        Ok(Self {
            name: name.to_owned(),
            bus: bus.clone(),
            line: params.u64_or("line", UART_TX_ADDR)?,
            decoder: UartDecoder::new(bit_period(params)?),
            until,
            echo: params.bool_or("echo", true)?,
            received: 0,
            pending_line: Vec::new(),
            seen_until: false,
        })
    }

    fn emit(&mut self, byte: u8) -> Result<(), ModelError> {
        if self.echo {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&[byte])
                .and_then(|()| stdout.flush())
                .map_err(|e| ModelError::fault(format!("console write failed: {e}")))?;
        }
        Ok(())
    }
}

impl SteppedModel for UartConsole {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        let txd = (self.bus.read_or(self.line, 1) & 1) as u8;
        let Some(byte) = self.decoder.process(txd) else {
            return Ok(());
        };

        self.received += 1;
        self.emit(byte)?;
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.pending_line).into_owned();
            debug!(model = %self.name, %line, "console line");
            self.pending_line.clear();
        } else {
            self.pending_line.push(byte);
        }
        if Some(byte) == self.until {
            self.seen_until = true;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.seen_until
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        if !self.pending_line.is_empty() {
            let line = String::from_utf8_lossy(&self.pending_line).into_owned();
            info!(model = %self.name, %line, "unterminated console line");
            self.pending_line.clear();
        }
        if self.decoder.is_receiving() {
            info!(model = %self.name, "stopped in the middle of a UART frame");
        }
        info!(model = %self.name, bytes = self.received, "console closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, Termination};

    fn run(descriptors: &[ModelDescriptor]) -> (u64, Termination) {
        let factory = BuiltinModels::default();
        let bus = factory.bus().clone();
        let mut sched = Scheduler::construct(descriptors, &factory)
            .unwrap()
            .on_round_end(move || bus.commit());
        let result = sched.run().unwrap();
        (result.rounds, result.termination)
    }

    #[test]
    fn finish_after_stops_the_run() {
        let (rounds, termination) = run(&[
            ModelDescriptor::new("led_writer").with_param("delay", 3u64),
            ModelDescriptor::new("finish_after").with_param("cycles", 40u64),
        ]);
        assert_eq!(rounds, 40);
        assert_eq!(termination, Termination::Finished { by: vec![1] });
    }

    #[test]
    fn led_monitor_sees_writer_burst() {
        let (rounds, termination) = run(&[
            ModelDescriptor::new("led_writer").with_param("delay", 10u64),
            ModelDescriptor::new("led_monitor").with_param("changes", 300u64),
        ]);
        // 255 writes per burst (0..=0xfe), then 10 idle rounds. The monitor
        // sees each write one round late.
        assert_eq!(rounds, 255 + 10 + 45 + 1);
        assert_eq!(termination, Termination::Finished { by: vec![1] });
    }

    #[test]
    fn uart_console_stops_on_terminator() {
        let (rounds, termination) = run(&[
            ModelDescriptor::new("uart_tx")
                .with_param("message", "ok\n")
                .with_param("bit_period", 8u64),
            ModelDescriptor::new("uart_console")
                .with_param("bit_period", 8u64)
                .with_param("until", u64::from(b'\n'))
                .with_param("echo", false),
        ]);
        assert_eq!(termination, Termination::Finished { by: vec![1] });
        // Third frame's stop bit is sampled mid-bit, one round behind the
        // transmitter.
        assert_eq!(rounds, 2 * 80 + 76 + 1);
    }

    #[test]
    fn second_driver_of_led_register_is_refused() {
        let factory = BuiltinModels::default();
        let err = Scheduler::construct(
            &[
                ModelDescriptor::new("led_writer").named("a"),
                ModelDescriptor::new("led_writer").named("b"),
            ],
            &factory,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConstructionError::Failed {
                index: 1,
                source: ModelError::RegionBusy { .. },
                ..
            }
        ));
        // Rollback released the first writer's claim.
        assert_eq!(factory.bus().owner_of(LED_ADDR), None);
    }

    #[test]
    fn monitor_ahead_of_writer_sees_the_same_round() {
        // Step order does not change what the monitor observes.
        let (rounds, _) = run(&[
            ModelDescriptor::new("led_monitor").with_param("changes", 300u64),
            ModelDescriptor::new("led_writer").with_param("delay", 10u64),
        ]);
        assert_eq!(rounds, 255 + 10 + 45 + 1);
    }

    #[test]
    fn claim_past_address_space_is_rejected() {
        let factory = BuiltinModels::default();
        let err = factory
            .build(&ModelDescriptor::new("led_writer").with_param("addr", "0xfffffffffffffffc"))
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::InvalidParam { param: "addr", .. }));

        let err = factory
            .build(&ModelDescriptor::new("uart_tx").with_param("line", u64::MAX))
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::InvalidParam { param: "line", .. }));

        // The top word itself is still claimable.
        assert!(
            factory
                .build(&ModelDescriptor::new("uart_tx").with_param("line", u64::MAX - 1))
                .is_ok()
        );
    }

    #[test]
    fn slow_uart_runs_to_round_limit() {
        let factory = BuiltinModels::default();
        let bus = factory.bus().clone();
        let mut sched = Scheduler::construct(
            &[
                ModelDescriptor::new("uart_tx")
                    .with_param("message", "A")
                    .with_param("bit_period", 500_000_000u64),
                ModelDescriptor::new("uart_console")
                    .with_param("bit_period", 500_000_000u64)
                    .with_param("echo", false),
            ],
            &factory,
        )
        .unwrap()
        .with_max_rounds(Some(3))
        .on_round_end(move || bus.commit());
        let result = sched.run().unwrap();
        assert_eq!(result.termination, Termination::RoundLimit);
        assert_eq!(result.rounds, 3);
    }

    #[test]
    fn unknown_kind_is_a_construction_error() {
        let factory = BuiltinModels::default();
        let err = factory.build(&ModelDescriptor::new("vga")).err().unwrap();
        assert!(matches!(err, ModelError::UnknownKind(kind) if kind == "vga"));
    }
}
