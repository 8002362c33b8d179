//! Desktop alerts through `notify-send`.
//!
//! A new alert runs `notify-send --print-id --wait`: the process prints the
//! notification id on its first stdout line and then stays alive until the
//! notification is closed. Its stdout is a non-blocking pipe watched by the
//! daemon loop, so the id and the close (EOF) both arrive as loop events
//! and nothing ever blocks or needs a thread.
//!
//! Updates to a visible alert run `notify-send --replace-id=<id>`, which
//! exits as soon as the notification is replaced; those children are
//! reaped with `try_wait` on later calls.

use std::collections::HashMap;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStdout, Command, Stdio};

use osd_core::BufferId;
use osd_transport::{Interest, Reactor, WatchId};
use tracing::{debug, trace, warn};

use super::AlertSink;
use crate::error::SinkError;

/// Default notifier program.
pub const DEFAULT_COMMAND: &str = "notify-send";

/// Default application name shown by the notification daemon.
pub const DEFAULT_APP_NAME: &str = "irccloud-osd";

/// Default freedesktop icon name.
pub const DEFAULT_ICON: &str = "mail-unread";

/// How `notify-send` is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySendOptions {
    /// Program to run, optionally followed by leading arguments
    /// (split on whitespace, e.g. `"env DISPLAY=:0 notify-send"`)
    pub command: String,

    pub app_name: String,

    /// Icon name or path (`--icon`); `None` sends no icon
    pub icon: Option<String>,

    /// Expiry in milliseconds (`--expire-time`); `None` leaves it to the
    /// notification daemon
    pub expire_time_ms: Option<u32>,
}

impl Default for NotifySendOptions {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            icon: Some(DEFAULT_ICON.to_string()),
            expire_time_ms: None,
        }
    }
}

/// Notification id as printed by `--print-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Identity {
    /// Not printed yet
    Pending,
    Known(u32),
    /// The first line was not an id; updates cannot be applied in place
    Unavailable,
}

/// A `notify-send --wait` process backing one visible alert.
struct Displayed {
    child: Child,
    stdout: ChildStdout,
    line: Vec<u8>,
    identity: Identity,

    /// Latest title and body requested before the id was known
    pending: Option<(String, String)>,

    watch: Option<WatchId>,
}

impl Displayed {
    fn fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }
}

/// What reading a display's pipe produced.
enum PipeEvent {
    /// The pipe has nothing more for now
    Idle,
    Closed,
}

/// `AlertSink` that shows desktop notifications.
pub struct NotifySendSink {
    options: NotifySendOptions,
    displayed: HashMap<BufferId, Displayed>,

    /// Short-lived `--replace-id` children not yet reaped
    replacers: Vec<Child>,

    /// Watches of displays closed outside `on_ready`, withdrawn on the
    /// next `register`
    stale: Vec<WatchId>,
}

impl NotifySendSink {
    pub fn new(options: NotifySendOptions) -> Self {
        Self {
            options,
            displayed: HashMap::new(),
            replacers: Vec::new(),
            stale: Vec::new(),
        }
    }

    /// Number of alerts currently on screen.
    pub fn displayed(&self) -> usize {
        self.displayed.len()
    }

    fn command(&self, title: &str, body: &str, extra: &[String]) -> Result<Command, SinkError> {
        let mut words = self.options.command.split_whitespace();
        let program = words.next().ok_or_else(|| SinkError::Spawn {
            command: self.options.command.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty notifier command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(words);
        cmd.arg(format!("--app-name={}", self.options.app_name));
        if let Some(icon) = &self.options.icon {
            cmd.arg(format!("--icon={icon}"));
        }
        if let Some(ms) = self.options.expire_time_ms {
            cmd.arg(format!("--expire-time={ms}"));
        }
        cmd.args(extra);
        // Keep option parsing away from titles and bodies starting with '-'
        cmd.arg("--").arg(title).arg(body);
        cmd.stdin(Stdio::null());
        Ok(cmd)
    }

    fn spawn_display(&self, title: &str, body: &str) -> Result<Displayed, SinkError> {
        let extra = ["--print-id".to_string(), "--wait".to_string()];
        let mut cmd = self.command(title, body, &extra)?;
        cmd.stdout(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| SinkError::Spawn {
            command: self.options.command.clone(),
            source,
        })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SinkError::Pipe(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "notifier stdout was not captured",
            )));
        };
        if let Err(e) = set_nonblocking(stdout.as_raw_fd()) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SinkError::Pipe(e));
        }

        Ok(Displayed {
            child,
            stdout,
            line: Vec::new(),
            identity: Identity::Pending,
            pending: None,
            watch: None,
        })
    }

    fn spawn_replace(&mut self, id: u32, title: &str, body: &str) -> Result<(), SinkError> {
        let extra = [format!("--replace-id={id}")];
        let mut cmd = self.command(title, body, &extra)?;
        cmd.stdout(Stdio::null());
        let child = cmd.spawn().map_err(|source| SinkError::Spawn {
            command: self.options.command.clone(),
            source,
        })?;
        trace!(id, pid = child.id(), "Replacing notification");
        self.replacers.push(child);
        Ok(())
    }

    /// Reaps replace children that have exited.
    fn reap(&mut self) {
        self.replacers.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    debug!(pid = child.id(), %status, "Notifier exited with failure");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                debug!(pid = child.id(), error = %e, "Failed to poll notifier");
                false
            }
        });
    }

    /// Drains a display's pipe, learning its id and applying a held update.
    fn service(&mut self, key: BufferId) -> Result<PipeEvent, SinkError> {
        let mut buf = [0u8; 256];
        let mut update = None;

        let event = {
            let Some(display) = self.displayed.get_mut(&key) else {
                return Ok(PipeEvent::Closed);
            };
            loop {
                match display.stdout.read(&mut buf) {
                    Ok(0) => break PipeEvent::Closed,
                    Ok(n) => {
                        display.line.extend_from_slice(&buf[..n]);
                        if display.identity == Identity::Pending {
                            if let Some(id) = parse_id(&mut display.line) {
                                display.identity = id;
                                debug!(bid = %key, identity = ?id, "Notification displayed");
                                update = display.pending.take();
                            }
                        } else {
                            display.line.clear();
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break PipeEvent::Idle,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(SinkError::Pipe(e)),
                }
            }
        };

        if let Some((title, body)) = update {
            self.apply(key, &title, &body)?;
        }
        Ok(event)
    }

    /// Updates an on-screen alert, or holds the update until its id arrives.
    fn apply(&mut self, key: BufferId, title: &str, body: &str) -> Result<(), SinkError> {
        let identity = match self.displayed.get_mut(&key) {
            Some(display) => {
                if display.identity == Identity::Pending {
                    trace!(bid = %key, "Holding update until the notification id is known");
                    display.pending = Some((title.to_string(), body.to_string()));
                }
                display.identity
            }
            None => return Ok(()),
        };

        match identity {
            Identity::Known(id) => self.spawn_replace(id, title, body),
            Identity::Pending => Ok(()),
            Identity::Unavailable => {
                debug!(bid = %key, "Notification id unknown, update not shown");
                Ok(())
            }
        }
    }

    /// Forgets a closed display and reaps its process.
    fn close(&mut self, key: BufferId) {
        if let Some(mut display) = self.displayed.remove(&key) {
            self.stale.extend(display.watch.take());
            match display.child.try_wait() {
                Ok(Some(_)) => {}
                // Closed its stdout but still running; reap it later
                Ok(None) => self.replacers.push(display.child),
                Err(e) => debug!(bid = %key, error = %e, "Failed to poll notifier"),
            }
        }
    }
}

impl AlertSink for NotifySendSink {
    fn show(&mut self, key: BufferId, title: &str, body: &str) -> Result<(), SinkError> {
        self.reap();

        if self.displayed.contains_key(&key) {
            return self.apply(key, title, body);
        }

        let shown = self.spawn_display(title, body)?;
        debug!(bid = %key, pid = shown.child.id(), "Spawned notifier");
        self.displayed.insert(key, shown);
        Ok(())
    }

    fn register(&mut self, reactor: &mut dyn Reactor) {
        for watch in self.stale.drain(..) {
            reactor.remove_watch(watch);
        }
        for display in self.displayed.values_mut() {
            if display.watch.is_none() {
                display.watch = Some(reactor.add_watch(display.fd(), Interest::Read));
            }
        }
    }

    fn on_ready(&mut self, reactor: &mut dyn Reactor, watch: WatchId) -> Option<Vec<BufferId>> {
        let key = self
            .displayed
            .iter()
            .find(|(_, d)| d.watch == Some(watch))
            .map(|(&key, _)| key)?;
        if let Some(display) = self.displayed.get_mut(&key) {
            display.watch = None;
        }

        let closed = match self.service(key) {
            Ok(PipeEvent::Idle) => false,
            Ok(PipeEvent::Closed) => true,
            Err(e) => {
                warn!(bid = %key, error = %e, "Lost track of notification");
                true
            }
        };

        if closed {
            self.close(key);
            self.reap();
            return Some(vec![key]);
        }

        // Watches are one-shot; keep listening for the close
        if let Some(display) = self.displayed.get_mut(&key) {
            display.watch = Some(reactor.add_watch(display.fd(), Interest::Read));
        }
        Some(Vec::new())
    }

    fn poll_dismissed(&mut self, key: BufferId) -> bool {
        if !self.displayed.contains_key(&key) {
            return false;
        }
        let closed = match self.service(key) {
            Ok(PipeEvent::Idle) => false,
            Ok(PipeEvent::Closed) => true,
            Err(e) => {
                warn!(bid = %key, error = %e, "Lost track of notification");
                true
            }
        };
        if closed {
            debug!(bid = %key, "Notification closed before its update");
            self.close(key);
            self.reap();
        }
        closed
    }
}

impl Drop for NotifySendSink {
    fn drop(&mut self) {
        for (_, mut display) in self.displayed.drain() {
            let _ = display.child.kill();
            let _ = display.child.wait();
        }
        for mut child in self.replacers.drain(..) {
            let _ = child.wait();
        }
    }
}

/// Parses the id line once it is complete.
fn parse_id(line: &mut Vec<u8>) -> Option<Identity> {
    let end = line.iter().position(|&b| b == b'\n')?;
    let identity = std::str::from_utf8(&line[..end])
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map_or(Identity::Unavailable, Identity::Known);
    line.clear();
    Some(identity)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is the open read end of a pipe owned by a ChildStdout.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the status flags are changed.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osd_transport::PollLoop;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};

    /// Fake notifier: logs its arguments and behaves like `notify-send`.
    ///
    /// New notifications print id 42 and stay open for `linger` seconds.
    fn fake_notifier(dir: &Path, linger: &str) -> NotifySendOptions {
        let log = dir.join("calls.log");
        let script = dir.join("notify.sh");
        let body = format!(
            "case \"$*\" in\n\
             *--replace-id*) echo \"replace $*\" >> {log} ;;\n\
             *) echo \"new $*\" >> {log}; echo 42; sleep {linger} ;;\n\
             esac\n",
            log = log.display(),
        );
        fs::write(&script, body).unwrap();
        NotifySendOptions {
            command: format!("sh {}", script.display()),
            ..NotifySendOptions::default()
        }
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Runs the loop until the sink reports a dismissal.
    fn wait_for_dismissal(sink: &mut NotifySendSink, ev: &mut PollLoop) -> Vec<BufferId> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            assert!(Instant::now() < deadline, "notifier never closed");
            sink.register(ev);
            for watch in ev.wait(Some(Duration::from_millis(100))).unwrap() {
                let dismissed = sink.on_ready(ev, watch).expect("watch belongs to sink");
                if !dismissed.is_empty() {
                    return dismissed;
                }
            }
        }
    }

    #[test]
    fn test_command_line() {
        let sink = NotifySendSink::new(NotifySendOptions {
            command: "env DISPLAY=:0 notify-send".to_string(),
            app_name: "osd".to_string(),
            icon: Some("irc".to_string()),
            expire_time_ms: Some(5000),
        });
        let cmd = sink.command("bob (Net)", "-hi", &["--wait".to_string()]).unwrap();
        assert_eq!(cmd.get_program(), "env");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "DISPLAY=:0",
                "notify-send",
                "--app-name=osd",
                "--icon=irc",
                "--expire-time=5000",
                "--wait",
                "--",
                "bob (Net)",
                "-hi",
            ]
        );
    }

    #[test]
    fn test_empty_command_is_spawn_error() {
        let mut sink = NotifySendSink::new(NotifySendOptions {
            command: "  ".to_string(),
            ..NotifySendOptions::default()
        });
        assert!(matches!(
            sink.show(BufferId::new(1), "t", "b"),
            Err(SinkError::Spawn { .. })
        ));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let mut sink = NotifySendSink::new(NotifySendOptions {
            command: "/nonexistent/notify-send".to_string(),
            ..NotifySendOptions::default()
        });
        assert!(sink.show(BufferId::new(1), "t", "b").is_err());
        assert_eq!(sink.displayed(), 0);
    }

    #[test]
    fn test_parse_id() {
        let mut line = b"42\n".to_vec();
        assert_eq!(parse_id(&mut line), Some(Identity::Known(42)));
        assert!(line.is_empty());

        let mut partial = b"4".to_vec();
        assert_eq!(parse_id(&mut partial), None);

        let mut garbage = b"unknown option --print-id\n".to_vec();
        assert_eq!(parse_id(&mut garbage), Some(Identity::Unavailable));
    }

    #[test]
    fn test_close_reports_dismissal() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = NotifySendSink::new(fake_notifier(dir.path(), "0"));
        let mut ev = PollLoop::new();
        let key = BufferId::new(10);

        sink.show(key, "bob (Net)", "hi").unwrap();
        assert_eq!(sink.displayed(), 1);

        assert_eq!(wait_for_dismissal(&mut sink, &mut ev), vec![key]);
        assert_eq!(sink.displayed(), 0);
        assert!(ev.is_empty());

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("--print-id --wait -- bob (Net) hi"));
    }

    #[test]
    fn test_update_before_id_is_applied_once_known() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = NotifySendSink::new(fake_notifier(dir.path(), "1"));
        let mut ev = PollLoop::new();
        let key = BufferId::new(10);

        sink.show(key, "bob (Net)", "a").unwrap();
        sink.show(key, "bob (Net)", "a\nb").unwrap();
        assert_eq!(sink.displayed(), 1);

        assert_eq!(wait_for_dismissal(&mut sink, &mut ev), vec![key]);
        drop(sink);

        // The multi-line body spreads each call over several log lines
        let calls = calls(dir.path());
        let new: Vec<_> = calls.iter().filter(|c| c.starts_with("new ")).collect();
        let replace: Vec<_> = calls.iter().filter(|c| c.starts_with("replace ")).collect();
        assert_eq!(new.len(), 1);
        assert_eq!(replace.len(), 1);
        assert!(replace[0].contains("--replace-id=42"));
    }

    #[test]
    fn test_default_options_carry_icon() {
        let sink = NotifySendSink::new(NotifySendOptions::default());
        let cmd = sink.command("t", "b", &[]).unwrap();
        assert_eq!(cmd.get_program(), DEFAULT_COMMAND);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&format!("--icon={DEFAULT_ICON}")));
    }

    #[test]
    fn test_close_before_update_starts_new_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = NotifySendSink::new(fake_notifier(dir.path(), "0"));
        let mut ev = PollLoop::new();
        let key = BufferId::new(10);

        sink.show(key, "bob (Net)", "first").unwrap();
        sink.register(&mut ev);
        assert_eq!(ev.len(), 1);

        // The notifier exits on its own; nothing services its watch
        let deadline = Instant::now() + Duration::from_secs(10);
        while !sink.poll_dismissed(key) {
            assert!(Instant::now() < deadline, "notifier never closed");
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(sink.displayed(), 0);
        assert!(!sink.poll_dismissed(key));

        sink.show(key, "bob (Net)", "second").unwrap();
        sink.register(&mut ev);
        assert_eq!(ev.len(), 1, "stale watch was not withdrawn");
        assert_eq!(wait_for_dismissal(&mut sink, &mut ev), vec![key]);
        drop(sink);

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("new ") && calls[0].ends_with("-- bob (Net) first"));
        assert!(calls[1].starts_with("new ") && calls[1].ends_with("-- bob (Net) second"));
    }
}
