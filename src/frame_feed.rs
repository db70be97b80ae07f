//! The connection to the tennicam server. A background thread keeps a TCP
//! connection to the server open, reconnecting while it is unreachable, and
//! hands the decoded [`Frame`]s over through a channel.

use crate::cancel::CancellationToken;
use crate::driver::Frame;

use log::{debug, info, warn};
use std::{
    io::{self, BufRead, BufReader, ErrorKind},
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc,
    thread,
    time::Duration,
};

/// Delay between two connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct FrameFeed {
    handle: Option<thread::JoinHandle<()>>,
    rx: mpsc::Receiver<Frame>,
    stop: CancellationToken,
}

impl FrameFeed {
    /// Starts receiving frames from the server at `url` (`host:port`).
    pub fn start(url: impl Into<String>) -> Self {
        let url = url.into();
        let (tx, rx) = mpsc::channel::<Frame>();
        let stop = CancellationToken::new();
        let th_stop = stop.clone();

        let handle = thread::spawn(move || {
            let mut warned = false;
            while !th_stop.is_cancelled() {
                match connect(&url) {
                    Ok(stream) => {
                        info!("connected to tennicam server at {url}");
                        warned = false;
                        match receive(stream, &tx, &th_stop) {
                            Ok(()) => info!("tennicam server at {url} closed the connection"),
                            Err(e) => warn!("tennicam server at {url} : received error {e}."),
                        }
                    }
                    Err(e) => {
                        if !warned {
                            warn!("failed to connect to tennicam server at {url} ({e}), retrying");
                            warned = true;
                        }
                        debug!("connection to {url} failed: {e}");
                    }
                }
                sleep_unless_stopped(RECONNECT_DELAY, &th_stop);
            }
        });

        FrameFeed {
            handle: Some(handle),
            rx,
            stop,
        }
    }

    /// All frames received since the previous call, oldest first.
    pub fn drain(&self) -> Vec<Frame> {
        self.rx.try_iter().collect()
    }

    /// Waits up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn stop(&mut self) {
        self.stop.cancel();
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("frame feed thread panicked");
            }
        }
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect(url: &str) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(ErrorKind::NotFound, format!("no address for {url}"));
    for address in url.to_socket_addrs()? {
        match TcpStream::connect_timeout(&address, RECONNECT_DELAY) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn sleep_unless_stopped(duration: Duration, stop: &CancellationToken) {
    let step = POLL_TIMEOUT.min(duration);
    let mut slept = Duration::ZERO;
    while slept < duration && !stop.is_cancelled() {
        thread::sleep(step);
        slept += step;
    }
}

/// Reads frames until the server closes the connection or `stop` is set.
fn receive(
    stream: TcpStream,
    tx: &mpsc::Sender<Frame>,
    stop: &CancellationToken,
) -> io::Result<()> {
    stream.set_read_timeout(Some(POLL_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    while !stop.is_cancelled() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) if line.ends_with(b"\n") => {
                match serde_json::from_slice::<Frame>(&line) {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("skipping undecodable frame : {e}"),
                }
                line.clear();
            }
            // partial line, the rest follows
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
