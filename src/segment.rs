//! Segments carry samples between processes. A segment is a TCP endpoint on
//! which one [`SegmentPublisher`] writes newline-delimited JSON
//! [`Stamped`] samples to every subscriber. A [`SegmentSource`] subscribes to
//! it and keeps a local [`SharedBuffer`] of what it received, so the control
//! loop reads from another process exactly as it would read from a buffer
//! filled by a thread.

use crate::sink::{Sink, SinkError};
use crate::source::{Source, SourceError, SharedBuffer, Stamped, DEFAULT_CAPACITY};

use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt,
    io::{self, BufRead, BufReader, ErrorKind, Write},
    marker::PhantomData,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

/// Writing end of a segment.
pub struct SegmentPublisher<T> {
    name: String,
    listener: TcpListener,
    subscribers: Vec<TcpStream>,
    next_sequence: u64,
    last_line: Option<String>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize> SegmentPublisher<T> {
    /// Binds the endpoint of segment `name` on `address`.
    pub fn bind(name: impl Into<String>, address: impl ToSocketAddrs) -> io::Result<Self> {
        let name = name.into();
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        info!("{} : publishing on {}", name, listener.local_addr()?);
        Ok(SegmentPublisher {
            name,
            listener,
            subscribers: Vec::new(),
            next_sequence: 0,
            last_line: None,
            _marker: PhantomData,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Takes in the subscribers that connected since the last call. New
    /// subscribers immediately receive the last published sample, if any.
    pub fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!("{} : dropping subscriber {} : {}", self.name, peer, e);
                        continue;
                    }
                    if let Some(line) = &self.last_line {
                        if let Err(e) = stream.write_all(line.as_bytes()) {
                            warn!("{} : dropping subscriber {} : {}", self.name, peer, e);
                            continue;
                        }
                    }
                    debug!("{} : new subscriber {}", self.name, peer);
                    self.subscribers.push(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("{} : received error {}.", self.name, e);
                    break;
                }
            }
        }
    }

    /// Sends `value` to every subscriber, assigning it the next sequence
    /// number, which is returned. Subscribers that can not be written to are
    /// dropped.
    pub fn publish(&mut self, value: &T) -> Result<u64, serde_json::Error> {
        self.accept_pending();
        let sequence = self.next_sequence;
        let mut line = serde_json::to_string(&Stamped { sequence, value })?;
        line.push('\n');
        let name = &self.name;
        self.subscribers.retain_mut(|stream| match stream.write_all(line.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                debug!("{} : subscriber gone : {}", name, e);
                false
            }
        });
        self.last_line = Some(line);
        self.next_sequence += 1;
        Ok(sequence)
    }
}

impl<T> fmt::Display for SegmentPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentPublisher({})", self.name)
    }
}

impl<T: Serialize> Sink<T> for SegmentPublisher<T> {
    fn dispatch(&mut self, record: &T) -> Result<(), SinkError> {
        self.publish(record)?;
        Ok(())
    }
}

/// Reading end of a segment.
pub struct SegmentSource<T> {
    buffer: SharedBuffer<T>,
    reader: Option<thread::JoinHandle<()>>,
    stream: TcpStream,
}

impl<T> SegmentSource<T>
where
    T: Clone + DeserializeOwned + Send + 'static,
{
    /// Subscribes to segment `name` at `address`. Reads wait at most
    /// `read_timeout` for a sample to arrive.
    pub fn connect(
        name: impl Into<String>,
        address: impl ToSocketAddrs,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let name = name.into();
        let stream = TcpStream::connect(address)?;
        info!("{} : subscribed to {}", name, stream.peer_addr()?);
        let buffer = SharedBuffer::new(name.clone(), DEFAULT_CAPACITY).with_read_timeout(read_timeout);
        let publisher = buffer.publisher();
        let reader_stream = stream.try_clone()?;

        let reader = thread::spawn(move || {
            for line in BufReader::new(reader_stream).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("{} : received error {}.", name, e);
                        break;
                    }
                };
                match serde_json::from_str::<Stamped<T>>(&line) {
                    Ok(stamped) => publisher.publish_stamped(stamped),
                    Err(e) => warn!("{} : skipping undecodable sample : {}", name, e),
                }
            }
            info!("{} : publisher went away", name);
            publisher.close();
        });

        Ok(SegmentSource {
            buffer,
            reader: Some(reader),
            stream,
        })
    }

    /// How long [`Source::latest`] waits for a first sample. `None` waits
    /// forever.
    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.buffer.set_startup_timeout(timeout);
        self
    }
}

impl<T> Drop for SegmentSource<T> {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl<T: Clone> fmt::Display for SegmentSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentSource({})", self.buffer)
    }
}

impl<T: Clone> Source for SegmentSource<T> {
    type Item = T;

    fn latest(&mut self) -> Result<Stamped<T>, SourceError> {
        self.buffer.latest()
    }

    fn read(&mut self, sequence: u64) -> Result<Stamped<T>, SourceError> {
        self.buffer.read(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Ball;
    use std::time::Instant;

    fn ball(id: i64) -> Ball {
        Ball {
            ball_id: id,
            time_stamp: id * 1000,
            position: [id as f64, 0.0, 1.0],
            velocity: [0.0; 3],
        }
    }

    fn wait_for_subscribers<T: Serialize>(publisher: &mut SegmentPublisher<T>, count: usize) {
        let started = Instant::now();
        while publisher.subscriber_count() < count {
            assert!(started.elapsed() < Duration::from_secs(2), "no subscriber");
            publisher.accept_pending();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn samples_cross_the_segment_in_order() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        let mut source =
            SegmentSource::<Ball>::connect("test", address, Duration::from_secs(1)).unwrap();
        wait_for_subscribers(&mut publisher, 1);

        for id in 0..5 {
            assert_eq!(publisher.publish(&ball(id)).unwrap(), id as u64);
        }
        for id in 0..5u64 {
            let stamped = source.read(id).unwrap();
            assert_eq!(stamped.sequence, id);
            assert_eq!(stamped.value, ball(id as i64));
        }
        assert_eq!(source.latest().unwrap().sequence, 4);
    }

    #[test]
    fn late_subscriber_gets_last_sample() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        publisher.publish(&ball(0)).unwrap();
        publisher.publish(&ball(1)).unwrap();

        let mut source =
            SegmentSource::<Ball>::connect("test", address, Duration::from_secs(1)).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        let latest = source.latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.value, ball(1));
    }

    #[test]
    fn closed_publisher_closes_source() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        let mut source =
            SegmentSource::<Ball>::connect("test", address, Duration::from_secs(1)).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        publisher.publish(&ball(0)).unwrap();
        drop(publisher);

        assert_eq!(source.read(0).unwrap().value, ball(0));
        assert!(matches!(source.read(1), Err(SourceError::Closed { .. })));
    }

    #[test]
    fn missing_sample_is_unavailable() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        let mut source =
            SegmentSource::<Ball>::connect("test", address, Duration::from_millis(50)).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        publisher.publish(&ball(0)).unwrap();
        assert!(matches!(
            source.read(1),
            Err(SourceError::Unavailable { sequence: 1, .. })
        ));
    }

    #[test]
    fn silent_segment_times_out_at_startup() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        let mut source = SegmentSource::<Ball>::connect("test", address, Duration::from_secs(1))
            .unwrap()
            .with_startup_timeout(Some(Duration::from_millis(50)));
        wait_for_subscribers(&mut publisher, 1);
        assert!(matches!(source.latest(), Err(SourceError::NoSample { .. })));
    }

    #[test]
    fn dead_subscribers_are_dropped() {
        let mut publisher = SegmentPublisher::<Ball>::bind("test", "127.0.0.1:0").unwrap();
        let address = publisher.local_addr().unwrap();
        let source =
            SegmentSource::<Ball>::connect("test", address, Duration::from_secs(1)).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        drop(source);

        // the first writes after a peer closed may still succeed
        let started = Instant::now();
        while publisher.subscriber_count() > 0 {
            assert!(started.elapsed() < Duration::from_secs(2));
            publisher.publish(&ball(0)).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
    }
}
