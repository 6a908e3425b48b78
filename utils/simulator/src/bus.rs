use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use crate::error::ModelError;

/// Memory-mapped signal space shared by the built-in models.
///
/// Any model may read any address. Driving an address range requires a
/// [`Claim`], which is exclusive and lasts until the claim is dropped together
/// with the model that holds it.
///
/// Writes are staged and only become visible at [`Bus::commit`], once per
/// round, so a reader sees the previous round's value whatever the step order.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Rc<RefCell<BusState>>,
}

#[derive(Default)]
struct BusState {
    words: HashMap<u64, u64>,
    staged: Vec<(u64, u64)>,
    claims: Vec<ClaimEntry>,
    next_claim: u64,
}

struct ClaimEntry {
    id: u64,
    owner: String,
    range: Range<u64>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, addr: u64) -> Option<u64> {
        self.inner.borrow().words.get(&addr).copied()
    }

    /// Read a word, or `default` if nothing has driven it yet.
    pub fn read_or(&self, addr: u64, default: u64) -> u64 {
        self.read(addr).unwrap_or(default)
    }

    /// Stage a write. Visible to readers after the next [`Bus::commit`].
    pub fn write(&self, addr: u64, value: u64) {
        self.inner.borrow_mut().staged.push((addr, value));
    }

    /// Publish every staged write; the last write to an address wins.
    pub fn commit(&self) {
        let mut state = self.inner.borrow_mut();
        let BusState { words, staged, .. } = &mut *state;
        words.extend(staged.drain(..));
    }

    pub fn claim(&self, owner: &str, range: Range<u64>) -> Result<Claim, ModelError> {
        let mut state = self.inner.borrow_mut();
        if let Some(existing) = state
            .claims
            .iter()
            .find(|c| c.range.start < range.end && range.start < c.range.end)
        {
            return Err(ModelError::RegionBusy {
                start: range.start,
                end: range.end,
                owner: existing.owner.clone(),
            });
        }

        let id = state.next_claim;
        state.next_claim += 1;
        state.claims.push(ClaimEntry {
            id,
            owner: owner.to_owned(),
            range: range.clone(),
        });
        Ok(Claim {
            bus: self.clone(),
            id,
            range,
        })
    }

    pub fn owner_of(&self, addr: u64) -> Option<String> {
        self.inner
            .borrow()
            .claims
            .iter()
            .find(|c| c.range.contains(&addr))
            .map(|c| c.owner.clone())
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Bus")
            .field("words", &state.words.len())
            .field("staged", &state.staged.len())
            .field("claims", &state.claims.len())
            .finish()
    }
}

/// Exclusive right to drive a bus range. Released on drop.
pub struct Claim {
    bus: Bus,
    id: u64,
    range: Range<u64>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.bus
            .inner
            .borrow_mut()
            .claims
            .retain(|c| c.id != self.id);
    }
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Claim(0x{:08x}..0x{:08x})", self.range.start, self.range.end)
    }
}
