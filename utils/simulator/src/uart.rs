//! 8N1 serial framing for the UART models.
//!
//! Frame: 1 start bit (0), 8 data bits LSB first, 1 stop bit (1). The line
//! idles high. Every bit lasts `bit_period` ticks.

/// Bit period of the reference SoC UART: the divider counts to 434 and each
/// serial bit lasts divider + 1 core cycles.
pub const DEFAULT_BIT_PERIOD: u32 = 435;

const FRAME_BITS: u64 = 10;

/// Transition-based receiver for a single-bit TX line.
///
/// A falling edge on an idle line starts a frame; data bits are sampled in the
/// middle of their period and the byte is emitted at the middle of the stop
/// bit, so the next start edge can be caught right after.
#[derive(Debug)]
pub struct UartDecoder {
    prev_txd: u8,
    bit_samples: Vec<u8>,
    cycles_since_start: u64,
    in_byte: bool,
    bit_period: u64,
}

impl UartDecoder {
    pub fn new(bit_period: u32) -> Self {
        Self {
            prev_txd: 1,
            bit_samples: Vec::with_capacity(8),
            cycles_since_start: 0,
            in_byte: false,
            bit_period: u64::from(bit_period),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.in_byte
    }

    /// Feed one tick of the TX line. Returns a byte when its frame completes.
    pub fn process(&mut self, txd: u8) -> Option<u8> {
        let txd_bit = txd & 1;

        if !self.in_byte && self.prev_txd == 1 && txd_bit == 0 {
            self.in_byte = true;
            self.cycles_since_start = 0;
            self.bit_samples.clear();
        }

        if self.in_byte {
            self.cycles_since_start += 1;

            let next_bit = self.bit_samples.len() as u64;
            if next_bit < 8 {
                let sample_time =
                    self.bit_period + self.bit_period / 2 + next_bit * self.bit_period;
                if self.cycles_since_start == sample_time {
                    self.bit_samples.push(txd_bit);
                }
            }

            let stop_sample_time = self.bit_period * 9 + self.bit_period / 2;
            if self.bit_samples.len() == 8 && self.cycles_since_start >= stop_sample_time {
                let byte = self.decode_bits();
                self.in_byte = false;
                self.bit_samples.clear();
                self.cycles_since_start = 0;
                return Some(byte);
            }
        }

        self.prev_txd = txd_bit;
        None
    }

    fn decode_bits(&self) -> u8 {
        self.bit_samples
            .iter()
            .enumerate()
            .fold(0u8, |byte, (i, &bit)| byte | (bit << i))
    }
}

/// Transmitter side: yields the line level for each tick of a message.
#[derive(Debug)]
pub struct UartEncoder {
    bytes: Vec<u8>,
    bit_period: u64,
    tick: u64,
}

impl UartEncoder {
    pub fn new(bytes: impl Into<Vec<u8>>, bit_period: u32) -> Self {
        Self {
            bytes: bytes.into(),
            bit_period: u64::from(bit_period),
            tick: 0,
        }
    }

    /// Ticks needed to shift the whole message out.
    pub fn total_ticks(&self) -> u64 {
        self.bytes.len() as u64 * FRAME_BITS * self.bit_period
    }

    pub fn is_finished(&self) -> bool {
        self.tick >= self.total_ticks()
    }

    /// Line level for the current tick, then advance. Idle high once finished.
    pub fn next_level(&mut self) -> u8 {
        if self.is_finished() {
            return 1;
        }
        let bit_index = self.tick / self.bit_period;
        let byte = self.bytes[(bit_index / FRAME_BITS) as usize];
        self.tick += 1;
        match bit_index % FRAME_BITS {
            0 => 0,
            9 => 1,
            data_bit => (byte >> (data_bit - 1)) & 1,
        }
    }
}
