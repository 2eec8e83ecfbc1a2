//! Scripted serial transport

use std::collections::VecDeque;

use turtleprog_core::console::Transport;
use turtleprog_core::timer::Timers;
use turtleprog_core::Command;

/// Transport fed from a keystroke script, capturing everything written
///
/// Counts as connected while script input remains (or while held open), so
/// a blocking prompt with an exhausted script returns instead of spinning.
///
/// A paced script holds its keys back until [`ScriptTransport::feed_next`]
/// releases them, one command at a time. Keys for later commands are then
/// not mistaken for an abort by a running blank check.
#[derive(Debug, Default)]
pub struct ScriptTransport<'t> {
    input: VecDeque<u8>,
    held: VecDeque<u8>,
    output: Vec<u8>,
    services: usize,
    hold_open: bool,
    timers: Option<&'t Timers>,
}

impl<'t> ScriptTransport<'t> {
    /// Create a transport that will deliver `input`
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Create a transport holding `script` back until it is fed
    pub fn paced(script: &[u8]) -> Self {
        Self {
            held: script.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Release the next command's keys once the previous ones are consumed
    ///
    /// A key that prompts for an argument is released together with the key
    /// after it. Returns the number of keys released.
    pub fn feed_next(&mut self) -> usize {
        if !self.input.is_empty() {
            return 0;
        }
        let Some(key) = self.held.pop_front() else {
            return 0;
        };
        self.input.push_back(key);
        if Command::from_byte(key).is_some_and(Command::reads_argument) {
            if let Some(argument) = self.held.pop_front() {
                self.input.push_back(argument);
            }
        }
        self.input.len()
    }

    /// Tick `timers` on every service call
    ///
    /// Lets console delays run to completion without a tick thread.
    pub fn with_timers(mut self, timers: &'t Timers) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Stay connected after the script runs out
    pub fn hold_open(mut self, hold: bool) -> Self {
        self.hold_open = hold;
        self
    }

    /// Append keystrokes
    pub fn push_input(&mut self, input: &[u8]) {
        self.input.extend(input);
    }

    /// Keystrokes not yet consumed, released or held back
    pub fn pending_input(&self) -> usize {
        self.input.len() + self.held.len()
    }

    /// Captured output as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Drain the captured output
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Number of service calls so far
    pub fn services(&self) -> usize {
        self.services
    }
}

impl Transport for ScriptTransport<'_> {
    fn service(&mut self) {
        self.services += 1;
        if let Some(timers) = self.timers {
            timers.tick();
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    fn connected(&self) -> bool {
        self.hold_open || !self.input.is_empty() || !self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnects_when_script_runs_out() {
        let mut t = ScriptTransport::new(b"h");
        assert!(t.connected());
        assert_eq!(t.read_byte(), Some(b'h'));
        assert!(!t.connected());
        let t = ScriptTransport::new(b"").hold_open(true);
        assert!(t.connected());
    }

    #[test]
    fn service_ticks_timers() {
        let timers = Timers::new();
        timers.delay.start(2);
        let mut t = ScriptTransport::new(b"").with_timers(&timers);
        t.service();
        t.service();
        assert!(timers.delay.expired());
        assert_eq!(t.services(), 2);
    }

    #[test]
    fn captures_output() {
        let mut t = ScriptTransport::new(b"");
        t.write(b"abc");
        assert_eq!(t.text(), "abc");
        assert_eq!(t.take_output(), b"abc");
        assert_eq!(t.text(), "");
    }

    #[test]
    fn paced_script_releases_one_command_at_a_time() {
        let mut t = ScriptTransport::paced(b"BP3X");
        assert!(t.connected());
        assert_eq!(t.read_byte(), None);

        assert_eq!(t.feed_next(), 1);
        assert_eq!(t.feed_next(), 0);
        assert_eq!(t.read_byte(), Some(b'B'));
        assert_eq!(t.read_byte(), None);

        assert_eq!(t.feed_next(), 2);
        assert_eq!(t.read_byte(), Some(b'P'));
        assert_eq!(t.read_byte(), Some(b'3'));
        assert_eq!(t.pending_input(), 1);

        t.feed_next();
        assert_eq!(t.read_byte(), Some(b'X'));
        assert_eq!(t.feed_next(), 0);
        assert!(!t.connected());
    }
}
