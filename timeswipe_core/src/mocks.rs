//! Test and helper front ends for timeswipe_core.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use timeswipe_traits::{BoxError, Bridge, RawRow, SensorFrontend};

/// One scripted read result.
#[derive(Debug, Clone)]
pub enum Step {
    Row(RawRow),
    Fault(&'static str),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    last: Option<RawRow>,
    bridges: Vec<Bridge>,
    measuring: bool,
    reads: u64,
}

/// Front end that replays a script of rows and faults, then repeats the
/// last row forever. Bridge selections are recorded for inspection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrontend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFrontend {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let s = Self::default();
        s.push(steps);
        s
    }

    /// Always return `row`.
    pub fn constant(row: RawRow) -> Self {
        Self::new([Step::Row(row)])
    }

    /// Append steps to the script. Safe while the stream runs.
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().steps.extend(steps);
    }

    pub fn bridges(&self) -> Vec<Bridge> {
        self.script.lock().bridges.clone()
    }

    pub fn reads(&self) -> u64 {
        self.script.lock().reads
    }

    pub fn is_measuring(&self) -> bool {
        self.script.lock().measuring
    }
}

impl SensorFrontend for ScriptedFrontend {
    fn read_channels(&mut self, _timeout: std::time::Duration) -> Result<RawRow, BoxError> {
        let mut s = self.script.lock();
        s.reads += 1;
        match s.steps.pop_front() {
            Some(Step::Row(r)) => {
                s.last = Some(r);
                Ok(r)
            }
            Some(Step::Fault(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => s
                .last
                .ok_or_else(|| Box::new(std::io::Error::other("script exhausted")) as BoxError),
        }
    }

    fn select_bridge(&mut self, bridge: Bridge) -> Result<(), BoxError> {
        self.script.lock().bridges.push(bridge);
        Ok(())
    }

    fn set_measuring(&mut self, on: bool) -> Result<(), BoxError> {
        self.script.lock().measuring = on;
        Ok(())
    }
}
