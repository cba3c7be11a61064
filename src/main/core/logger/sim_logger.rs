use std::cell::RefCell;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::{Lazy, OnceCell};

use crate::core::support::emulated_time::EmulatedTime;
use crate::core::worker::{HostInfo, Worker};

/// Trigger an asynchronous flush when this many lines are queued.
const ASYNC_FLUSH_QD_LINES_THRESHOLD: usize = 10_000;

/// Performs a *synchronous* flush when this many lines are queued. If log lines are still coming
/// in faster than they can be flushed after reaching `ASYNC_FLUSH_QD_LINES_THRESHOLD`, we pause and
/// let the flush finish rather than letting the queue keep growing.
const SYNC_FLUSH_QD_LINES_THRESHOLD: usize = 10 * ASYNC_FLUSH_QD_LINES_THRESHOLD;

/// Logging thread flushes at least this often.
const MIN_FLUSH_FREQUENCY: Duration = Duration::from_secs(10);

static SIM_LOGGER: Lazy<SimLogger> = Lazy::new(SimLogger::new);

/// Real time is measured from the first use of the logger.
static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// A logger that attaches simulation context (the simulated time and the active host) to log
/// records. Records are buffered in a lock-free queue and written to stdout by a helper thread.
pub struct SimLogger {
    // `Sender` isn't `Sync`, so it's protected by a mutex. It's only locked once per thread to
    // clone into the thread-local `SENDER`.
    command_sender: Mutex<Sender<LoggerCommand>>,

    // Locked by the logger thread for as long as it's running.
    command_receiver: Mutex<Receiver<LoggerCommand>>,

    records: ArrayQueue<SimLogRecord>,

    // When false, sends a (still-asynchronous) flush command to the logger thread every time a
    // record is pushed into `records`.
    buffering_enabled: RwLock<bool>,

    // The maximum log level, unless overridden by a host-specific log level.
    max_log_level: OnceCell<LevelFilter>,
}

thread_local!(static SENDER: RefCell<Option<Sender<LoggerCommand>>> = const { RefCell::new(None) });

impl SimLogger {
    /// Install the logger. Returns an error if a logger (this one or any other) has already been
    /// installed.
    pub fn init(max_log_level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&*SIM_LOGGER)?;

        // only reachable once, since `set_logger` above can only succeed once
        SIM_LOGGER.max_log_level.get_or_init(|| max_log_level);
        Lazy::force(&START_TIME);

        // the logger decides the max level itself (see `SimLogger::enabled`) since hosts can
        // override it, so the log crate should give us all log messages
        log::set_max_level(LevelFilter::Trace);

        // start the thread that will receive log records and flush them to output
        let spawned = std::thread::Builder::new()
            .name("sim-logger".to_string())
            .spawn(move || SIM_LOGGER.logger_thread_fn());

        if let Err(e) = spawned {
            // without the helper thread, records are only written by synchronous flushes
            eprintln!("WARNING: Couldn't start the logger thread: {e}");
        }

        // flush the logger on panic
        let default_panic_handler = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            // flush on the current thread rather than sending a command to the logger thread,
            // which may be in a bad state
            SIM_LOGGER.flush_records(None).ok();
            default_panic_handler(panic_info);
        }));

        Ok(())
    }

    fn new() -> SimLogger {
        let (sender, receiver) = std::sync::mpsc::channel();

        SimLogger {
            records: ArrayQueue::new(SYNC_FLUSH_QD_LINES_THRESHOLD),
            command_sender: Mutex::new(sender),
            command_receiver: Mutex::new(receiver),
            buffering_enabled: RwLock::new(false),
            max_log_level: OnceCell::new(),
        }
    }

    fn logger_thread_fn(&self) {
        let Ok(command_receiver) = self.command_receiver.lock() else {
            return;
        };

        loop {
            use std::sync::mpsc::RecvTimeoutError;
            let rv = match command_receiver.recv_timeout(MIN_FLUSH_FREQUENCY) {
                Ok(LoggerCommand::Flush(done_sender)) => self.flush_records(done_sender),
                Err(RecvTimeoutError::Timeout) => self.flush_records(None),
                // every sender is gone
                Err(RecvTimeoutError::Disconnected) => return,
            };

            if let Err(e) = rv {
                // can't log from the logger thread
                eprintln!("WARNING: Logger couldn't write records: {e}");
            }
        }
    }

    /// Write the records that are currently queued. If `done_sender` is provided, it's notified
    /// after the flush has completed.
    fn flush_records(&self, done_sender: Option<Sender<()>>) -> std::io::Result<()> {
        use std::io::Write;

        // only flush records that are already in the queue, not ones that arrive while we're
        // flushing
        let mut toflush = self.records.len();

        let stdout = std::io::stdout();
        let mut stdout = std::io::BufWriter::new(stdout.lock());

        while toflush > 0 {
            // another thread (for example a panicking thread) may also be consuming the queue
            let Some(record) = self.records.pop() else {
                break;
            };
            toflush -= 1;

            write!(stdout, "{record}")?;
        }

        stdout.flush()?;

        if let Some(done_sender) = done_sender {
            // the calling thread may have gone away
            done_sender.send(()).ok();
        }

        Ok(())
    }

    /// When disabled, the logger thread is notified to write each record as soon as it's created.
    /// The calling thread still isn't blocked on the record actually being written.
    pub fn set_buffering_enabled(&self, buffering_enabled: bool) {
        if let Ok(mut writer) = self.buffering_enabled.write() {
            *writer = buffering_enabled;
        }
    }

    /// If the maximum log level has not yet been set, returns `LevelFilter::Trace`.
    pub fn max_level(&self) -> LevelFilter {
        self.max_log_level
            .get()
            .copied()
            .unwrap_or(LevelFilter::Trace)
    }

    fn flush_impl(&self, notify_done: Option<Sender<()>>) {
        self.send_command(LoggerCommand::Flush(notify_done))
    }

    /// Flush and block until it's completed.
    fn flush_sync(&self) {
        let (done_sender, done_receiver) = std::sync::mpsc::channel();
        self.flush_impl(Some(done_sender));

        // don't wait forever if the logger thread isn't running
        if done_receiver.recv_timeout(MIN_FLUSH_FREQUENCY).is_err() {
            self.flush_records(None).ok();
        }
    }

    fn flush_async(&self) {
        self.flush_impl(None);
    }

    fn send_command(&self, cmd: LoggerCommand) {
        SENDER
            .try_with(|thread_sender| {
                if thread_sender.borrow().is_none() {
                    if let Ok(lock) = self.command_sender.lock() {
                        *thread_sender.borrow_mut() = Some(lock.clone());
                    }
                }

                let sent = thread_sender
                    .borrow()
                    .as_ref()
                    .map(|sender| sender.send(cmd).is_ok());

                if sent != Some(true) {
                    println!("WARNING: Couldn't send command to logger thread");
                }
            })
            .unwrap_or_else(|e| {
                println!("WARNING: Couldn't get sender channel to logger thread: {e:?}");
            });
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let filter = match Worker::with_active_host_info(|host| host.log_level) {
            Some(Some(level)) => level,
            _ => self.max_level(),
        };
        metadata.level() <= filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut sim_record = SimLogRecord {
            level: record.level(),
            file: record.file_static(),
            module_path: record.module_path_static(),
            line: record.line(),
            message: std::fmt::format(*record.args()),
            wall_time: START_TIME.elapsed(),
            emu_time: Worker::current_time(),
            host_info: Worker::with_active_host_info(|host| host.clone()),
        };

        loop {
            match self.records.push(sim_record) {
                Ok(()) => break,
                Err(r) => {
                    // queue is full, so flush it and try again
                    sim_record = r;
                    self.flush_sync();
                }
            }
        }

        let buffering_enabled = self.buffering_enabled.read().map(|x| *x).unwrap_or(false);

        if record.level() == Level::Error {
            // we're likely about to crash one way or another
            self.flush_sync();
        } else if self.records.len() > ASYNC_FLUSH_QD_LINES_THRESHOLD || !buffering_enabled {
            self.flush_async();
        }
    }

    fn flush(&self) {
        self.flush_sync();
    }
}

struct SimLogRecord {
    level: Level,
    file: Option<&'static str>,
    module_path: Option<&'static str>,
    line: Option<u32>,
    message: String,
    wall_time: Duration,
    emu_time: Option<EmulatedTime>,
    host_info: Option<HostInfo>,
}

/// Write `nanos` as `hh:mm:ss.<fraction>`, where the fraction has `digits` digits.
fn write_time(f: &mut std::fmt::Formatter<'_>, nanos: u128, digits: u32) -> std::fmt::Result {
    let secs = nanos / 1_000_000_000;
    let fraction = (nanos % 1_000_000_000) / 10u128.pow(9 - digits);

    write!(
        f,
        "{:02}:{:02}:{:02}.{:0width$}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        fraction,
        width = digits as usize,
    )
}

impl std::fmt::Display for SimLogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_time(f, self.wall_time.as_nanos(), 6)?;

        if let Some(emu_time) = self.emu_time {
            let sim_time = emu_time.saturating_duration_since(&EmulatedTime::SIMULATION_START);
            write!(f, " [")?;
            write_time(f, sim_time.as_nanos(), 9)?;
            write!(f, "]")?;
        } else {
            write!(f, " [n/a]")?;
        }

        write!(f, " [{level}]", level = self.level)?;

        if let Some(host) = &self.host_info {
            write!(
                f,
                " [{hostname}:{ip}]",
                hostname = host.name,
                ip = host.default_ip,
            )?;
        } else {
            write!(f, " [n/a]")?;
        }

        let file = self
            .file
            .map(|f| match f.rfind('/') {
                Some(sep_pos) => &f[(sep_pos + 1)..],
                None => f,
            })
            .unwrap_or("n/a");

        write!(f, " [{file}:")?;
        if let Some(line) = self.line {
            write!(f, "{line}")?;
        } else {
            write!(f, "n/a")?;
        }

        writeln!(
            f,
            "] [{module}] {msg}",
            module = self.module_path.unwrap_or("n/a"),
            msg = self.message
        )
    }
}

enum LoggerCommand {
    // takes an optional one-shot channel to notify that the flush has completed
    Flush(Option<Sender<()>>),
}

pub fn set_buffering_enabled(buffering_enabled: bool) {
    SIM_LOGGER.set_buffering_enabled(buffering_enabled);
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::core::support::simulation_time::SimulationTime;

    fn record() -> SimLogRecord {
        SimLogRecord {
            level: Level::Debug,
            file: Some("src/main/host/network/dispatch.rs"),
            module_path: Some("shadow_netcore::host::network::dispatch"),
            line: Some(42),
            message: "event started".to_string(),
            wall_time: Duration::from_micros(3_723_000_001),
            emu_time: None,
            host_info: None,
        }
    }

    #[test]
    fn test_format_without_context() {
        assert_eq!(
            record().to_string(),
            "01:02:03.000001 [n/a] [DEBUG] [n/a] [dispatch.rs:42] \
             [shadow_netcore::host::network::dispatch] event started\n"
        );
    }

    #[test]
    fn test_format_with_host() {
        let mut record = record();
        record.emu_time = Some(
            EmulatedTime::SIMULATION_START
                + SimulationTime::from_secs(61)
                + SimulationTime::from_nanos(5),
        );
        record.host_info = Some(HostInfo {
            name: "client".into(),
            default_ip: Ipv4Addr::new(11, 0, 0, 2),
            log_level: None,
        });
        record.line = None;

        assert_eq!(
            record.to_string(),
            "01:02:03.000001 [00:01:01.000000005] [DEBUG] [client:11.0.0.2] [dispatch.rs:n/a] \
             [shadow_netcore::host::network::dispatch] event started\n"
        );
    }

    #[test]
    fn test_host_level_override() {
        let logger = SimLogger::new();
        logger.max_log_level.set(LevelFilter::Warn).unwrap();

        let debug = Metadata::builder().level(Level::Debug).build();
        let warn = Metadata::builder().level(Level::Warn).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&warn));

        let info = HostInfo {
            name: "verbose".into(),
            default_ip: Ipv4Addr::new(11, 0, 0, 3),
            log_level: Some(LevelFilter::Trace),
        };
        Worker::with_host_context(info, || assert!(logger.enabled(&debug)));
    }
}
