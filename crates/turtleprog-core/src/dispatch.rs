//! Mode handling and the single-character command protocol
//!
//! In run mode the FPGA owns the SPI bus and console bytes belong to the
//! UART bridge. A short button press switches to programmer mode: the bus is
//! claimed, the card mounted, and every received byte is a command.

use crate::bus::{SharedBus, SpiPort};
use crate::config::Config;
use crate::console::{Console, Transport};
use crate::error::Result;
use crate::file::FileReader;
use crate::flash::{SpiFlash, PAGE_SIZE};
use crate::ops::{self, BlankCheckJob, CopyJob, FailReason, Hardware, Outcome, VerifyJob};
use crate::sdcard::{CardType, SdCard};
use crate::timer::{Timers, TICK_FREQ};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// FPGA running, console passed through to its UART
    Run,
    /// Programmer owns the bus and interprets commands
    Program,
}

/// Programmer-mode commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Check that the flash is erased
    BlankCheck,
    /// Reboot into the DFU bootloader
    FirmwareUpdate,
    /// Erase the flash
    Erase,
    /// Print the command list
    Help,
    /// Hex dump of one flash page
    PageDump,
    /// Compare flash with the card image
    Verify,
    /// Copy the card image into flash
    Write,
    /// Leave programmer mode
    Exit,
}

impl Command {
    /// Every command, in help order
    pub const ALL: [Command; 8] = [
        Command::BlankCheck,
        Command::FirmwareUpdate,
        Command::Erase,
        Command::Help,
        Command::PageDump,
        Command::Verify,
        Command::Write,
        Command::Exit,
    ];

    /// Parse a command key (case-insensitive)
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte.to_ascii_uppercase() {
            b'B' => Some(Self::BlankCheck),
            b'D' => Some(Self::FirmwareUpdate),
            b'E' => Some(Self::Erase),
            b'H' => Some(Self::Help),
            b'P' => Some(Self::PageDump),
            b'V' => Some(Self::Verify),
            b'W' => Some(Self::Write),
            b'X' => Some(Self::Exit),
            _ => None,
        }
    }

    /// Key that selects this command
    pub fn key(self) -> char {
        match self {
            Self::BlankCheck => 'B',
            Self::FirmwareUpdate => 'D',
            Self::Erase => 'E',
            Self::Help => 'H',
            Self::PageDump => 'P',
            Self::Verify => 'V',
            Self::Write => 'W',
            Self::Exit => 'X',
        }
    }

    /// True if the command prompts for one more key before it runs
    pub fn reads_argument(self) -> bool {
        matches!(self, Self::PageDump | Self::FirmwareUpdate)
    }

    /// Name used in status lines
    pub fn title(self) -> &'static str {
        match self {
            Self::BlankCheck => "Blank check",
            Self::FirmwareUpdate => "Firmware update",
            Self::Erase => "Erase",
            Self::Help => "Help",
            Self::PageDump => "Page dump",
            Self::Verify => "Verify",
            Self::Write => "FLASH programming",
            Self::Exit => "Exit",
        }
    }

    /// Help text for this command
    pub fn description(self) -> &'static str {
        match self {
            Self::BlankCheck => "verify FPGA configuration erased",
            Self::FirmwareUpdate => "put into DFU mode for upgrading this firmware",
            Self::Erase => "erase FPGA configuration",
            Self::Help => "print this help message",
            Self::PageDump => "dump a FPGA configuration page (followed by page 0-9)",
            Self::Verify => "verify FPGA configuration against SD card",
            Self::Write => "write FPGA configuration from SD card",
            Self::Exit => "exit programmer mode and run",
        }
    }
}

/// What happened in response to input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Nothing for the platform to act on
    Idle,
    /// Run-mode byte for the UART bridge
    PassThrough(u8),
    /// A transfer command finished
    Done(Command, Outcome),
    /// The mode changed
    ModeChanged(Mode),
    /// The operator confirmed a firmware update; reboot into the bootloader
    EnterBootloader,
}

/// The programmer: board peripherals, console and mode
#[derive(Debug)]
pub struct Programmer<'t, P, F, T> {
    hw: Hardware<'t, P, F>,
    console: Console<T>,
    timers: &'t Timers,
    config: Config,
    mode: Mode,
}

impl<'t, P: SpiPort, F: FileReader, T: Transport> Programmer<'t, P, F, T> {
    /// Create a programmer in run mode
    pub fn new(port: P, file: F, transport: T, timers: &'t Timers, config: Config) -> Self {
        let flash =
            SpiFlash::new(timers, config.revision).with_ready_timeout(config.flash_ready_timeout);
        Self {
            hw: Hardware {
                bus: SharedBus::new(port),
                card: SdCard::new(timers),
                flash,
                file,
            },
            console: Console::new(transport),
            timers,
            config,
            mode: Mode::Run,
        }
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Borrow the peripherals
    pub fn hardware(&self) -> &Hardware<'t, P, F> {
        &self.hw
    }

    /// Mutably borrow the peripherals
    pub fn hardware_mut(&mut self) -> &mut Hardware<'t, P, F> {
        &mut self.hw
    }

    /// Borrow the console
    pub fn console(&self) -> &Console<T> {
        &self.console
    }

    /// Mutably borrow the console
    pub fn console_mut(&mut self) -> &mut Console<T> {
        &mut self.console
    }

    /// Take the programmer apart
    pub fn into_parts(self) -> (Hardware<'t, P, F>, Console<T>) {
        (self.hw, self.console)
    }

    /// Short press of the mode button: toggle between run and programmer mode
    pub fn button_pressed(&mut self) -> Result<Event> {
        match self.mode {
            Mode::Run => {
                self.enter_program_mode()?;
                Ok(Event::ModeChanged(Mode::Program))
            }
            Mode::Program => {
                self.leave_program_mode();
                Ok(Event::ModeChanged(Mode::Run))
            }
        }
    }

    /// Claim the bus and mount the card
    ///
    /// If the card cannot be mounted the bus is handed back and the
    /// programmer stays in run mode.
    pub fn enter_program_mode(&mut self) -> Result<CardType> {
        self.console.puts("\r\nChanging to programmer mode\r\n");
        self.console.service();
        self.hw.bus.acquire();
        self.console.puts("Mounting SD drive\r\n");

        let card_type = match self.hw.card.initialize(&mut self.hw.bus) {
            Ok(card_type) => card_type,
            Err(e) => {
                self.console.print(format_args!("SD error: {}\r\n", e));
                self.hw.bus.release();
                return Err(e);
            }
        };
        self.console
            .print(format_args!("{} card detected\r\n", card_type));

        match self.hw.flash.read_id(&mut self.hw.bus) {
            Ok(id) => log::info!("flash JEDEC ID {}", id),
            Err(e) => log::warn!("could not read flash ID: {}", e),
        }

        self.print_help();
        self.console.service();
        self.mode = Mode::Program;
        log::info!("programmer mode");
        Ok(card_type)
    }

    /// Unmount the card, hand the bus back and return to run mode
    pub fn leave_program_mode(&mut self) {
        self.hw.card.unmount();
        self.hw.bus.release();
        self.console.delay(&self.timers.delay, TICK_FREQ);
        self.console.puts("changing to run mode\r\n");
        self.mode = Mode::Run;
        log::info!("run mode");
    }

    /// Service the console and handle at most one received byte
    pub fn poll(&mut self) -> Event {
        self.console.service();
        match self.console.poll_byte() {
            Some(byte) => self.handle_byte(byte),
            None => Event::Idle,
        }
    }

    /// Handle one received byte
    pub fn handle_byte(&mut self, byte: u8) -> Event {
        match self.mode {
            Mode::Run => Event::PassThrough(byte),
            Mode::Program => match Command::from_byte(byte) {
                Some(command) => self.execute(command),
                None => {
                    self.print_help();
                    Event::Idle
                }
            },
        }
    }

    /// Run one command
    pub fn execute(&mut self, command: Command) -> Event {
        log::debug!("command {:?}", command);
        let interval = self.config.progress_interval;
        let path = self.config.image_path;

        let outcome = match command {
            Command::Help => {
                self.print_help();
                return Event::Idle;
            }
            Command::FirmwareUpdate => return self.firmware_update(),
            Command::Exit => {
                self.leave_program_mode();
                return Event::ModeChanged(Mode::Run);
            }
            Command::PageDump => match self.page_dump() {
                Some(outcome) => outcome,
                None => return Event::Idle,
            },
            Command::BlankCheck => {
                let job = BlankCheckJob::new(&mut self.hw.bus, &self.hw.flash, interval);
                ops::run(job, &mut self.console)
            }
            Command::Erase => {
                match ops::erase(&mut self.hw.bus, &mut self.hw.flash, &mut self.console) {
                    Ok(()) => Outcome::Complete {
                        bytes: self.hw.flash.capacity(),
                    },
                    Err(e) => Outcome::failed(0, e),
                }
            }
            Command::Verify => match VerifyJob::start(&mut self.hw, path, interval) {
                Ok(job) => ops::run(job, &mut self.console),
                Err(e) => Outcome::failed(0, e),
            },
            Command::Write => match CopyJob::start(&mut self.hw, path, interval) {
                Ok(job) => ops::run(job, &mut self.console),
                Err(e) => Outcome::failed(0, e),
            },
        };

        if let Outcome::Failed {
            reason: FailReason::Io(e),
            ..
        } = &outcome
        {
            log::warn!("{} failed: {}", command.title(), e);
        }
        self.report(command, &outcome);
        Event::Done(command, outcome)
    }

    /// Print the command summary
    pub fn print_help(&mut self) {
        self.console.puts("\r\n\r\nTurtle FPGA Programmer\r\n");
        self.console.puts("======================\r\n\r\n");
        self.console.puts("Commands:\r\n");
        for command in Command::ALL {
            self.console.print(format_args!(
                "\t{}\t{}\r\n",
                command.key(),
                command.description()
            ));
        }
    }

    fn page_dump(&mut self) -> Option<Outcome> {
        let key = self.console.wait_byte()?;
        let Some(page) = ops::page_from_key(key) else {
            self.console.puts("Page number must be 0-9\r\n");
            return None;
        };
        Some(
            match ops::dump_page(&mut self.hw.bus, &self.hw.flash, &mut self.console, page) {
                Ok(()) => Outcome::Complete {
                    bytes: PAGE_SIZE as u32,
                },
                Err(e) => Outcome::failed(0, e),
            },
        )
    }

    fn firmware_update(&mut self) -> Event {
        self.console.puts(
            "This will start the firmware upgrade process,\r\n\
             press 'c' to continue, any other key to cancel\r\n",
        );
        let Some(key) = self.console.wait_byte() else {
            return Event::Idle;
        };
        self.console.putc(key);
        if key != b'c' {
            self.print_help();
            return Event::Idle;
        }
        self.console.service();

        self.console
            .puts("Disconnect your serial connection, rebooting into DFU mode in 8");
        for i in (1..=7).rev() {
            self.console.delay(&self.timers.delay, TICK_FREQ);
            self.console.print(format_args!(".{}", i));
        }
        log::info!("rebooting into bootloader");
        Event::EnterBootloader
    }

    fn report(&mut self, command: Command, outcome: &Outcome) {
        let console = &mut self.console;
        if let Outcome::Failed {
            reason: FailReason::Io(e),
            ..
        } = outcome
        {
            console.print(format_args!("{}\r\n", e));
        }
        match (command, outcome) {
            (Command::Write, _) => console.print(format_args!(
                "\n{} {}\r\n",
                command.title(),
                outcome.status()
            )),
            (
                Command::Verify,
                Outcome::Failed {
                    reason: FailReason::Mismatch(log),
                    ..
                },
            ) => console.print(format_args!(
                "Verify failed with {} errors\r\n",
                log.count()
            )),
            (Command::BlankCheck | Command::Verify, _) | (_, Outcome::Failed { .. }) => console
                .print(format_args!("{} {}\r\n", command.title(), outcome.status())),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::RecordingPort;
    use crate::console::tests::MemTransport;
    use crate::error::Error;
    use crate::file::BlockDevice;

    struct NoFiles;

    impl FileReader for NoFiles {
        fn open<D: BlockDevice>(&mut self, _dev: &mut D, _path: &str) -> Result<()> {
            Err(Error::FileNotFound)
        }

        fn read<D: BlockDevice>(&mut self, _dev: &mut D, _buf: &mut [u8]) -> Result<usize> {
            Err(Error::FileNotOpen)
        }
    }

    fn programmer<'t>(
        timers: &'t Timers,
        input: &[u8],
    ) -> Programmer<'t, RecordingPort, NoFiles, MemTransport> {
        Programmer::new(
            RecordingPort::default(),
            NoFiles,
            MemTransport::with_input(input),
            timers,
            Config::default(),
        )
    }

    #[test]
    fn command_keys_are_case_insensitive() {
        for command in Command::ALL {
            let key = command.key() as u8;
            assert_eq!(Command::from_byte(key), Some(command));
            assert_eq!(Command::from_byte(key.to_ascii_lowercase()), Some(command));
        }
        assert_eq!(Command::from_byte(b'?'), None);
        assert_eq!(Command::from_byte(b'm'), None);
    }

    #[test]
    fn run_mode_passes_bytes_through() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"x");
        assert_eq!(p.poll(), Event::PassThrough(b'x'));
        assert_eq!(p.mode(), Mode::Run);
        assert!(p.console().transport().output.is_empty());
    }

    #[test]
    fn unknown_command_prints_help() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"");
        p.mode = Mode::Program;
        assert_eq!(p.handle_byte(b'?'), Event::Idle);
        let text = p.console().transport().text();
        assert!(text.contains("Turtle FPGA Programmer"));
        assert!(text.contains("\tW\twrite FPGA configuration from SD card\r\n"));
    }

    #[test]
    fn write_without_card_fails() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"");
        p.mode = Mode::Program;
        let event = p.handle_byte(b'w');
        assert_eq!(
            event,
            Event::Done(Command::Write, Outcome::failed(0, Error::CardNotMounted))
        );
        assert!(p
            .console()
            .transport()
            .text()
            .ends_with("\nFLASH programming failed\r\n"));
    }

    #[test]
    fn firmware_update_cancel_prints_help() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"n");
        p.mode = Mode::Program;
        assert_eq!(p.execute(Command::FirmwareUpdate), Event::Idle);
        let text = p.console().transport().text();
        assert!(text.contains("press 'c' to continue"));
        assert!(text.contains("\r\nn\r\n\r\nTurtle FPGA Programmer"));
    }

    #[test]
    fn page_dump_rejects_non_digit() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"z");
        p.mode = Mode::Program;
        assert_eq!(p.execute(Command::PageDump), Event::Idle);
        assert_eq!(
            p.console().transport().text(),
            "Page number must be 0-9\r\n"
        );
    }

    #[test]
    fn io_failure_reports_command_name() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"");
        p.mode = Mode::Program;
        let event = p.execute(Command::BlankCheck);
        assert_eq!(
            event,
            Event::Done(Command::BlankCheck, Outcome::failed(0, Error::BusNotOwned))
        );
        let text = p.console().transport().text();
        assert!(text.ends_with("SPI bus not claimed\r\nBlank check failed\r\n"));
        assert!(!text.contains("BlankCheck"));
    }

    #[test]
    fn page_dump_failure_uses_console_wording() {
        let timers = Timers::new();
        let mut p = programmer(&timers, b"3");
        p.mode = Mode::Program;
        p.execute(Command::PageDump);
        assert!(p
            .console()
            .transport()
            .text()
            .ends_with("SPI bus not claimed\r\nPage dump failed\r\n"));
    }
}
