//! Update records and the opcode registry used to decode them.

use super::codec::{ArgReader, UpdateArg};
use crate::error::{CacheError, Result};
use crate::types::OpCode;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// A buffered mutation of a cache's state `S`.
///
/// Records are queued while a transaction runs, written to the log at
/// commit, and applied to every snapshot the commit reaches.
pub trait Update<S>: fmt::Debug + Send + 'static {
    fn opcode(&self) -> OpCode;

    /// Bytes needed for the argument, excluding the opcode. May overestimate.
    fn size(&self) -> usize;

    fn write_arg(&self, out: &mut Vec<u8>) -> Result<()>;

    /// Mutate `state` in place. Called once per snapshot during commit and
    /// once per record during replay.
    fn apply(&self, state: &mut S) -> Result<()>;

    /// Fold this record into the previously queued one.
    ///
    /// Returning `true` means `previous` now carries both effects and this
    /// record is discarded.
    fn combine(&self, _previous: &mut dyn Update<S>) -> bool {
        false
    }

    /// Return `true` if applying `previous` then this record is a no-op, in
    /// which case both are dropped from the queue.
    fn cancel(&self, _previous: &dyn Update<S>) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a, S: 'static> dyn Update<S> + 'a {
    pub fn downcast_ref<T: Update<S>>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Update<S>>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is_reload_marker(&self) -> bool {
        self.as_any().is::<ReloadMarker>()
    }
}

/// Write `opcode` followed by the argument.
pub fn encode_update<S: 'static>(update: &dyn Update<S>, out: &mut Vec<u8>) -> Result<()> {
    out.reserve(1 + update.size());
    out.push(update.opcode().0);
    update.write_arg(out)
}

/// Log marker written when a snapshot is saved.
///
/// It changes nothing during commit. During replay it makes the cache
/// reload its saved state instead of trusting the deltas read so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadMarker;

impl<S: 'static> Update<S> for ReloadMarker {
    fn opcode(&self) -> OpCode {
        OpCode::RELOAD
    }

    fn size(&self) -> usize {
        0
    }

    fn write_arg(&self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn apply(&self, _state: &mut S) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type Decoder<S> = Box<dyn Fn(&mut ArgReader<'_>) -> Result<Box<dyn Update<S>>> + Send + Sync>;

/// Maps operation codes to decoders for one cache's update kinds.
pub struct UpdateRegistry<S> {
    decoders: HashMap<OpCode, Decoder<S>>,
}

impl<S: 'static> Default for UpdateRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> UpdateRegistry<S> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register an update kind built from a decoded argument of type `A`.
    ///
    /// ```ignore
    /// registry.register(OpCode(1), |delta: i64| AddTotal { delta })?;
    /// ```
    pub fn register<A, U, F>(&mut self, opcode: OpCode, build: F) -> Result<()>
    where
        A: UpdateArg + 'static,
        U: Update<S>,
        F: Fn(A) -> U + Send + Sync + 'static,
    {
        if opcode.is_reload() {
            return Err(CacheError::invalid_state(
                "opcode 0 is reserved for the reload marker",
            ));
        }
        if self.decoders.contains_key(&opcode) {
            return Err(CacheError::invalid_state(format!(
                "opcode {} registered twice",
                opcode
            )));
        }
        let decoder: Decoder<S> = Box::new(move |reader: &mut ArgReader<'_>| {
            let arg = A::decode(reader)?;
            Ok(Box::new(build(arg)) as Box<dyn Update<S>>)
        });
        self.decoders.insert(opcode, decoder);
        Ok(())
    }

    pub fn contains(&self, opcode: OpCode) -> bool {
        self.decoders.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Construct the update for `opcode`, decoding its argument from `reader`.
    pub fn create_update(
        &self,
        opcode: OpCode,
        reader: &mut ArgReader<'_>,
    ) -> Result<Box<dyn Update<S>>> {
        match self.decoders.get(&opcode) {
            Some(decode) => decode(reader),
            None => Err(CacheError::corrupt(
                reader.position().saturating_sub(1),
                format!("unrecognized opcode {}", opcode),
            )),
        }
    }
}
