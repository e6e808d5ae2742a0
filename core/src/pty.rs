//! Portable PTY: open a pseudo-terminal and spawn a shell in it. The reader
//! runs on a dedicated OS thread (portable_pty's reader is blocking); output
//! is forwarded to an async channel. Resize and write go through the master
//! directly, guarded by a lock since portable_pty's handles aren't `Sync`
//! on every backend.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

use crate::config::ShellSpec;
use crate::error::PtyError;

/// One open pseudo-terminal plus the shell running inside it.
pub trait Pty: Send + Sync {
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;
    fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()>;
    fn close(&self) -> std::io::Result<()>;
    /// Device path of the slave side, e.g. `/dev/pts/4`. Empty if unknown.
    fn tty_path(&self) -> &str;
    fn pid(&self) -> u32;
}

/// portable_pty's ptsname isn't re-entrant; serialize calls process-wide.
static PTSNAME_LOCK: Mutex<()> = Mutex::new(());

#[cfg(unix)]
fn tty_path_of(master: &dyn portable_pty::MasterPty) -> String {
    let Some(fd) = master.as_raw_fd() else {
        return String::new();
    };
    let _guard = PTSNAME_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        let ptr = libc::ptsname(fd);
        if ptr.is_null() {
            return String::new();
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(not(unix))]
fn tty_path_of(_master: &dyn portable_pty::MasterPty) -> String {
    String::new()
}

pub struct RealPty {
    master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    tty_path: String,
    pid: u32,
}

impl Pty for RealPty {
    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        w.write_all(buf)?;
        w.flush()?;
        Ok(buf.len())
    }

    fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()> {
        let master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        master
            .resize(PtySize {
                cols,
                rows,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn close(&self) -> std::io::Result<()> {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        child.kill()?;
        let _ = child.wait();
        Ok(())
    }

    fn tty_path(&self) -> &str {
        &self.tty_path
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

/// Builds the command to spawn inside the PTY. When `tmux_target` is set,
/// the PTY runs `tmux attach-session -t <target>` instead of the configured
/// shell — a `create` naming a tmux session/window must actually land inside
/// that tmux session, not a bare shell that merely claims to be attached.
#[cfg(unix)]
fn build_command(shell: &ShellSpec, cwd: Option<&str>, tmux_target: Option<&str>) -> CommandBuilder {
    let mut c = if let Some(target) = tmux_target {
        let mut c = CommandBuilder::new("tmux");
        c.arg("attach-session");
        c.arg("-t");
        c.arg(target);
        c
    } else {
        let mut c = CommandBuilder::new(&shell.program);
        for arg in &shell.args {
            c.arg(arg);
        }
        c
    };
    c.env("TERM", "xterm-256color");
    c.env("COLORTERM", "truecolor");
    if let Some(dir) = cwd {
        c.cwd(dir);
    }
    c
}

#[cfg(windows)]
fn build_command(shell: &ShellSpec, cwd: Option<&str>, tmux_target: Option<&str>) -> CommandBuilder {
    let mut c = if let Some(target) = tmux_target {
        let mut c = CommandBuilder::new("tmux");
        c.arg("attach-session");
        c.arg("-t");
        c.arg(target);
        c
    } else {
        let mut c = CommandBuilder::new(&shell.program);
        for arg in &shell.args {
            c.arg(arg);
        }
        c
    };
    if let Some(dir) = cwd {
        c.cwd(dir);
    }
    c
}

/// Open a PTY and spawn `shell` in it (or, if `tmux_target` is set, attach to
/// that tmux session/window instead). Returns the handle, a channel that
/// receives raw output chunks until the shell exits and the reader thread
/// hits EOF, and a one-shot-ish channel that yields the exit code once the
/// child has terminated.
pub fn open_pty(
    shell: &ShellSpec,
    cwd: Option<&str>,
    tmux_target: Option<&str>,
) -> Result<(Arc<dyn Pty>, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<i32>), PtyError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| PtyError::Open(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let cmd = build_command(shell, cwd, tmux_target);
    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    let pid = child.process_id().unwrap_or(0);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Open(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Open(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let tty_path = tty_path_of(pair.master.as_ref());
    let child = Arc::new(Mutex::new(child));

    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let (exit_tx, exit_rx) = mpsc::channel::<i32>(1);
    let child_poll = Arc::clone(&child);
    std::thread::spawn(move || loop {
        let status = {
            let mut guard = match child_poll.lock() {
                Ok(g) => g,
                Err(_) => break,
            };
            match guard.try_wait() {
                Ok(None) => None,
                Ok(Some(s)) => Some(s.exit_code() as i32),
                Err(_) => break,
            }
        };
        match status {
            Some(code) => {
                let _ = exit_tx.blocking_send(code);
                break;
            }
            None => std::thread::sleep(std::time::Duration::from_millis(500)),
        }
    });

    let pty = Arc::new(RealPty {
        master: Mutex::new(pair.master),
        writer: Mutex::new(writer),
        child,
        tty_path,
        pid,
    });
    Ok((pty, rx, exit_rx))
}

/// In-memory double for tests: queue bytes to be "read" from the pty, and
/// record writes/resizes for assertion. `push_output`/`push_exit` feed the
/// same shape of channels `open_pty` hands to `spawn_read_pump`, so a test
/// can drive the read pump exactly as a real PTY would.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::Pty;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    pub struct FakePty {
        written: Mutex<Vec<u8>>,
        last_resize: Mutex<Option<(u16, u16)>>,
        closed: Mutex<bool>,
        tty_path: String,
        pid: u32,
        fail_write: Mutex<bool>,
        output_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        output_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
        exit_tx: Mutex<Option<mpsc::Sender<i32>>>,
        exit_rx: Mutex<Option<mpsc::Receiver<i32>>>,
    }

    impl FakePty {
        pub fn new(tty_path: impl Into<String>, pid: u32) -> Self {
            let (output_tx, output_rx) = mpsc::channel(256);
            let (exit_tx, exit_rx) = mpsc::channel(1);
            Self {
                written: Mutex::new(Vec::new()),
                last_resize: Mutex::new(None),
                closed: Mutex::new(false),
                tty_path: tty_path.into(),
                pid,
                fail_write: Mutex::new(false),
                output_tx: Mutex::new(Some(output_tx)),
                output_rx: Mutex::new(Some(output_rx)),
                exit_tx: Mutex::new(Some(exit_tx)),
                exit_rx: Mutex::new(Some(exit_rx)),
            }
        }

        pub fn written(&self) -> Vec<u8> {
            self.written.lock().clone()
        }

        pub fn last_resize(&self) -> Option<(u16, u16)> {
            *self.last_resize.lock()
        }

        pub fn is_closed(&self) -> bool {
            *self.closed.lock()
        }

        pub fn set_fail_write(&self, fail: bool) {
            *self.fail_write.lock() = fail;
        }

        /// Takes the receiving half of the output channel, to be handed to
        /// `spawn_read_pump` in place of `open_pty`'s real reader thread.
        /// Panics if called more than once per `FakePty`.
        pub fn take_output_rx(&self) -> mpsc::Receiver<Vec<u8>> {
            self.output_rx
                .lock()
                .take()
                .expect("output receiver already taken")
        }

        pub fn take_exit_rx(&self) -> mpsc::Receiver<i32> {
            self.exit_rx
                .lock()
                .take()
                .expect("exit receiver already taken")
        }

        /// Injects a chunk of "output" as if the shell had written it.
        pub fn push_output(&self, bytes: impl Into<Vec<u8>>) {
            if let Some(tx) = self.output_tx.lock().as_ref() {
                let _ = tx.try_send(bytes.into());
            }
        }

        /// Simulates EOF on the reader: no more output will ever arrive.
        pub fn close_output(&self) {
            self.output_tx.lock().take();
        }

        /// Injects a process exit code, as the exit-poll thread would.
        pub fn push_exit(&self, code: i32) {
            if let Some(tx) = self.exit_tx.lock().take() {
                let _ = tx.try_send(code);
            }
        }
    }

    impl Pty for FakePty {
        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            if *self.fail_write.lock() {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "fake write failure"));
            }
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()> {
            *self.last_resize.lock() = Some((cols, rows));
            Ok(())
        }

        fn close(&self) -> std::io::Result<()> {
            *self.closed.lock() = true;
            Ok(())
        }

        fn tty_path(&self) -> &str {
            &self.tty_path
        }

        fn pid(&self) -> u32 {
            self.pid
        }
    }
}
