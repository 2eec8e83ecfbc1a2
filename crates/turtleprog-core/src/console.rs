//! Operator console over the platform's serial transport
//!
//! The USB CDC stack lives outside the core. It must be serviced often,
//! which the console does on every blocking wait.

use core::fmt;

use crate::timer::Countdown;

/// Non-blocking serial transport (USB CDC on the board)
pub trait Transport {
    /// Run the transport's housekeeping; must return promptly
    fn service(&mut self);

    /// Next received byte, if any
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue bytes for the host
    fn write(&mut self, data: &[u8]);

    /// Optional: Whether a host is still attached
    fn connected(&self) -> bool {
        true
    }
}

/// Text console on top of a [`Transport`]
#[derive(Debug)]
pub struct Console<T> {
    transport: T,
}

impl<T: Transport> Console<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unwrap the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Service the transport once
    pub fn service(&mut self) {
        self.transport.service();
    }

    /// Take a received byte without waiting
    pub fn poll_byte(&mut self) -> Option<u8> {
        self.transport.read_byte()
    }

    /// Wait for a keystroke, servicing the transport meanwhile
    ///
    /// Returns `None` if the host goes away first.
    pub fn wait_byte(&mut self) -> Option<u8> {
        loop {
            self.transport.service();
            if let Some(byte) = self.transport.read_byte() {
                return Some(byte);
            }
            if !self.transport.connected() {
                return None;
            }
        }
    }

    /// Write a string
    pub fn puts(&mut self, s: &str) {
        self.transport.write(s.as_bytes());
    }

    /// Write a single byte
    pub fn putc(&mut self, byte: u8) {
        self.transport.write(&[byte]);
    }

    /// Write formatted text
    pub fn print(&mut self, args: fmt::Arguments<'_>) {
        // Writing to the transport cannot fail
        let _ = fmt::Write::write_fmt(self, args);
    }

    /// Wait `ticks` on `timer`, servicing the transport meanwhile
    pub fn delay(&mut self, timer: &Countdown, ticks: u16) {
        timer.start(ticks);
        while !timer.expired() {
            self.transport.service();
        }
    }
}

impl<T: Transport> fmt::Write for Console<T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::string::String;
    use std::vec::Vec;

    /// Scripted transport: input queue, captured output
    #[derive(Debug, Default)]
    pub struct MemTransport {
        pub input: VecDeque<u8>,
        pub output: Vec<u8>,
        pub services: usize,
    }

    impl MemTransport {
        pub fn with_input(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                ..Self::default()
            }
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl Transport for MemTransport {
        fn service(&mut self) {
            self.services += 1;
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }

        fn write(&mut self, data: &[u8]) {
            self.output.extend_from_slice(data);
        }

        fn connected(&self) -> bool {
            !self.input.is_empty()
        }
    }

    #[test]
    fn print_formats_into_transport() {
        let mut console = Console::new(MemTransport::default());
        console.print(format_args!("{} kb\r", 10));
        console.putc(b'!');
        assert_eq!(console.transport().text(), "10 kb\r!");
    }

    #[test]
    fn wait_byte_services_and_returns_key() {
        let mut console = Console::new(MemTransport::with_input(b"c"));
        assert_eq!(console.wait_byte(), Some(b'c'));
        assert!(console.transport().services >= 1);
    }

    #[test]
    fn wait_byte_gives_up_when_disconnected() {
        let mut console = Console::new(MemTransport::default());
        assert_eq!(console.wait_byte(), None);
    }
}
