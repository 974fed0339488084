//! Call-scoped lifetime extension.
//!
//! Every bound call runs inside a [`LifeSupport`] frame. Temporaries created
//! while converting arguments are added to the innermost frame as
//! *patients* and released when the frame is popped, after the native
//! function has returned. Frames are per thread.
//!
//! [`keep_alive`] is the frame-independent counterpart: it ties a patient to
//! the lifetime of a nurse object.

use std::cell::RefCell;
use std::marker::PhantomData;

use hostbind_core::{BindError, BindResult, HostObject};
use hostbind_registry::Scope;

struct Frame {
    patients: Vec<HostObject>,
    scope: Scope,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for one patient frame.
///
/// Dropping the guard pops the frame and releases its patients. Guards must
/// be dropped in reverse order of creation; the guard is not `Send`.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct LifeSupport {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl LifeSupport {
    /// Push a new frame whose conversions see types from `scope`.
    pub fn enter(scope: Scope) -> Self {
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(Frame {
                patients: Vec::new(),
                scope,
            });
            frames.len()
        });
        LifeSupport {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Depth of this frame, starting at 1.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for LifeSupport {
    fn drop(&mut self) {
        let frame = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            debug_assert_eq!(frames.len(), self.depth, "life support frames popped out of order");
            frames.pop()
        });
        match frame {
            // Patients drop here, outside the borrow, since releasing them can
            // run code that opens frames of its own.
            Some(frame) => drop(frame.patients),
            None => log::error!("life support frame stack underflow"),
        }
    }
}

/// Keep `patient` alive until the innermost frame is popped.
pub fn add_patient(patient: HostObject) -> BindResult<()> {
    FRAMES.with(|frames| match frames.borrow_mut().last_mut() {
        Some(frame) => {
            frame.patients.push(patient);
            Ok(())
        }
        None => Err(BindError::NoActiveFrame),
    })
}

/// Keep `patient` alive for as long as `nurse` is alive. A no-op when
/// either side is none.
pub fn keep_alive(nurse: &HostObject, patient: &HostObject) {
    if nurse.is_none() || patient.is_none() {
        return;
    }
    nurse.retain(patient.clone());
}

/// Scope of the innermost frame, or the global scope outside any call.
pub fn current_scope() -> Scope {
    FRAMES.with(|frames| frames.borrow().last().map_or(Scope::Global, |frame| frame.scope))
}

/// Number of frames on this thread.
pub fn frame_depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Number of patients in the innermost frame.
pub fn patient_count() -> usize {
    FRAMES.with(|frames| frames.borrow().last().map_or(0, |frame| frame.patients.len()))
}
