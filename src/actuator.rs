//! actuator state (the LED on the reference board)
//!
//! a single on/off flag. writes from http and from observer sessions land
//! in the same place, last write wins.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

#[derive(Debug, Default)]
pub struct ActuatorState {
    on: AtomicBool,
}

impl ActuatorState {
    /// replace the state, returns the new value
    pub fn set(&self, on: bool) -> bool {
        self.on.store(on, Ordering::SeqCst);
        on
    }

    pub fn get(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// `{"state": true}`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub state: bool,
}

impl ActuatorCommand {
    /// only a real json boolean is accepted; 1, "on" and "true" are not
    pub fn from_value(value: &Value) -> Result<Self, PipelineError> {
        match value.get("state") {
            None => Err(PipelineError::validation("state field is required")),
            Some(Value::Bool(state)) => Ok(Self { state: *state }),
            Some(_) => Err(PipelineError::validation("state must be true or false")),
        }
    }
}
