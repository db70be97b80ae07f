use crate::driver::Frame;
use crate::observation::TimeStamp;

use log::{debug, info, warn};
use rand::prelude::*;
use std::io::{self, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Period of the dummy server when none is given.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10);

/// Stands in for the tennicam server: publishes a ball moving along a smooth
/// curve, optionally noisy and with missed detections.
pub struct DummyServer {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    local_addr: SocketAddr,
}

enum Signal {
    Noise(f64),
    Dropout(f64),
    Stop,
}

/// Nanoseconds since the unix epoch.
pub fn time_now() -> TimeStamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as TimeStamp)
        .unwrap_or(0)
}

/// Position of the ball in frame `num`, before noise.
pub fn trajectory(num: i64) -> [f64; 3] {
    let step = (num + 1) as f64;
    let x = 0.001 * step;
    let y = 0.001 * step;
    let z = -0.0005 * step;
    [x.cos(), y.sin(), z.cos()]
}

struct Generator {
    num: i64,
    noise: f64,
    dropout: f64,
    rng: ThreadRng,
}

impl Generator {
    fn next_frame(&mut self) -> Frame {
        let num = self.num;
        self.num += 1;
        let detected = self.dropout <= 0.0 || !self.rng.gen_bool(self.dropout.min(1.0));
        let obs = detected.then(|| {
            let mut position = trajectory(num);
            if self.noise > 0.0 {
                for value in position.iter_mut() {
                    *value += self.rng.gen_range(-self.noise..self.noise);
                }
            }
            position
        });
        Frame {
            num,
            time: time_now(),
            proc_time: 1,
            obs,
        }
    }
}

impl DummyServer {
    /// Binds `address` and starts publishing a frame every `period`.
    pub fn start(address: impl ToSocketAddrs, period: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("dummy server publishing on {local_addr}");

        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = thread::spawn(move || {
            let mut generator = Generator {
                num: 0,
                noise: 0.0,
                dropout: 0.0,
                rng: thread_rng(),
            };
            let mut clients: Vec<TcpStream> = Vec::new();
            let mut running = true;
            while running {
                while let Ok(received) = rx.try_recv() {
                    match received {
                        Signal::Noise(new_noise) => generator.noise = new_noise.abs(),
                        Signal::Dropout(new_dropout) => generator.dropout = new_dropout.max(0.0),
                        Signal::Stop => running = false,
                    }
                }
                accept_clients(&listener, &mut clients);

                let frame = generator.next_frame();
                match serde_json::to_string(&frame) {
                    Ok(mut line) => {
                        line.push('\n');
                        clients.retain_mut(|client| client.write_all(line.as_bytes()).is_ok());
                    }
                    Err(e) => warn!("dummy server : received error {e}."),
                }
                thread::sleep(period);
            }
            info!("dummy server stopped after {} frames", generator.num);
        });

        Ok(DummyServer {
            handle: Some(handle),
            tx,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Adds uniform noise of amplitude `noise` to each coordinate.
    pub fn set_noise(&self, noise: f64) {
        // The thread only exits on `stop`.
        let _ = self.tx.send(Signal::Noise(noise));
    }

    /// Probability for a frame to carry no observation.
    pub fn set_dropout(&self, dropout: f64) {
        let _ = self.tx.send(Signal::Dropout(dropout));
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("dummy server thread panicked");
            }
        }
    }
}

impl Drop for DummyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_clients(listener: &TcpListener, clients: &mut Vec<TcpStream>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_ok() {
                    debug!("dummy server : new client {peer}");
                    clients.push(stream);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("dummy server : received error {e}.");
                break;
            }
        }
    }
}
