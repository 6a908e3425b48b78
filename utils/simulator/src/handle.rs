use std::fmt;

use tracing::{debug, warn};

use crate::error::{HandleError, ModelError};
use crate::model::SteppedModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Live,
    /// A step failed; the model is never stepped again.
    Faulted,
    Finalized,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Live => "live",
            Self::Faulted => "faulted",
            Self::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Owning wrapper around one model instance.
///
/// Dropping a handle that was never finalized finalizes it first, so a model
/// always gets its flush even on an abnormal teardown.
pub struct ModelHandle {
    id: usize,
    name: String,
    instance: Box<dyn SteppedModel>,
    state: HandleState,
    done: bool,
    steps: u64,
}

impl ModelHandle {
    pub fn new(id: usize, name: impl Into<String>, instance: Box<dyn SteppedModel>) -> Self {
        Self {
            id,
            name: name.into(),
            instance,
            state: HandleState::Live,
            done: false,
            steps: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state != HandleState::Finalized
    }

    /// Number of successful steps so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step(&mut self) -> Result<(), HandleError> {
        if self.state != HandleState::Live {
            return Err(HandleError::InvalidState {
                id: self.id,
                state: self.state,
            });
        }

        match self.instance.step() {
            Ok(()) => {
                self.steps += 1;
                Ok(())
            }
            Err(source) => {
                self.state = HandleState::Faulted;
                Err(HandleError::Fault {
                    id: self.id,
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Latched termination query: once the model has been seen done, the
    /// handle keeps reporting it.
    pub fn is_done(&mut self) -> bool {
        if !self.done && self.instance.is_done() {
            debug!(id = self.id, model = %self.name, steps = self.steps, "model signaled done");
            self.done = true;
        }
        self.done
    }

    /// Run the model's shutdown once. Later calls are no-ops.
    pub fn finalize(&mut self) -> Result<(), ModelError> {
        if self.state == HandleState::Finalized {
            return Ok(());
        }
        self.state = HandleState::Finalized;
        debug!(id = self.id, model = %self.name, "finalizing");
        self.instance.finalize()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!(id = self.id, model = %self.name, error = %e, "finalize on drop failed");
        }
        debug!(id = self.id, model = %self.name, "released");
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("done", &self.done)
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Counter {
        steps: Rc<Cell<u32>>,
        finals: Rc<Cell<u32>>,
        done_at: u32,
        fail_at: Option<u32>,
    }

    impl SteppedModel for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn step(&mut self) -> Result<(), ModelError> {
            let n = self.steps.get() + 1;
            if Some(n) == self.fail_at {
                return Err(ModelError::fault("boom"));
            }
            self.steps.set(n);
            Ok(())
        }

        fn is_done(&self) -> bool {
            // Only raised on the exact step, so the handle has to latch it.
            self.steps.get() == self.done_at
        }

        fn finalize(&mut self) -> Result<(), ModelError> {
            self.finals.set(self.finals.get() + 1);
            Ok(())
        }
    }

    fn counter(done_at: u32, fail_at: Option<u32>) -> (ModelHandle, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let steps = Rc::new(Cell::new(0));
        let finals = Rc::new(Cell::new(0));
        let model = Counter {
            steps: steps.clone(),
            finals: finals.clone(),
            done_at,
            fail_at,
        };
        (ModelHandle::new(0, "counter", Box::new(model)), steps, finals)
    }

    #[test]
    fn done_signal_is_latched() {
        let (mut handle, _, _) = counter(2, None);
        handle.step().unwrap();
        assert!(!handle.is_done());
        handle.step().unwrap();
        assert!(handle.is_done());
        handle.step().unwrap();
        assert!(handle.is_done());
        assert!(handle.is_done());
    }

    #[test]
    fn finalize_runs_once() {
        let (mut handle, _, finals) = counter(1, None);
        handle.finalize().unwrap();
        handle.finalize().unwrap();
        assert_eq!(finals.get(), 1);
        assert!(!handle.is_alive());
        drop(handle);
        assert_eq!(finals.get(), 1);
    }

    #[test]
    fn drop_finalizes_unfinalized_handle() {
        let (handle, _, finals) = counter(1, None);
        drop(handle);
        assert_eq!(finals.get(), 1);
    }

    #[test]
    fn stepping_finalized_handle_is_invalid() {
        let (mut handle, steps, _) = counter(1, None);
        handle.finalize().unwrap();
        assert!(matches!(
            handle.step(),
            Err(HandleError::InvalidState { state: HandleState::Finalized, .. })
        ));
        assert_eq!(steps.get(), 0);
    }

    #[test]
    fn faulted_handle_is_not_stepped_again() {
        let (mut handle, steps, _) = counter(10, Some(2));
        handle.step().unwrap();
        assert!(matches!(handle.step(), Err(HandleError::Fault { id: 0, .. })));
        assert_eq!(handle.state(), HandleState::Faulted);
        assert!(matches!(
            handle.step(),
            Err(HandleError::InvalidState { state: HandleState::Faulted, .. })
        ));
        assert_eq!(steps.get(), 1);
        assert_eq!(handle.steps(), 1);
    }
}
