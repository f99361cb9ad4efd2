//! Passive side of discovery: answers `DISCOVER_SERVER` probes with our base URL

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::protocol::PROBE_PAYLOAD;

/// UDP responder bound to `0.0.0.0:<port>`
pub struct Advertiser {
    socket: UdpSocket,
    response: String,
}

impl Advertiser {
    /// Bind the advertiser socket
    ///
    /// `response` is the exact payload sent back to every probe, normally
    /// `http://<local-ip>:<http-port>`. `read_timeout` bounds how long a stop
    /// request can go unnoticed.
    pub fn bind(port: u16, response: impl Into<String>, read_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(Self {
            socket,
            response: response.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve probes until `running` is cleared or the socket fails
    pub fn run(&self, running: &AtomicBool) {
        info!(
            addr = ?self.socket.local_addr().ok(),
            response = %self.response,
            "Advertiser listening"
        );

        let mut buf = [0u8; 1024];
        while running.load(Ordering::SeqCst) {
            let (len, sender) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
                Err(e) => {
                    error!(error = %e, "Advertiser socket failed, advertiser stopped");
                    return;
                }
            };

            if &buf[..len] != PROBE_PAYLOAD {
                debug!(%sender, len, "Ignoring unexpected datagram");
                continue;
            }

            if let Err(e) = self.socket.send_to(self.response.as_bytes(), sender) {
                error!(%sender, error = %e, "Advertiser reply failed, advertiser stopped");
                return;
            }
            debug!(%sender, "Answered discovery probe");
        }

        debug!("Advertiser stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn spawn_advertiser(response: &str) -> (SocketAddr, Arc<AtomicBool>, thread::JoinHandle<()>) {
        let advertiser = Advertiser::bind(0, response, Duration::from_millis(50)).unwrap();
        let port = advertiser.local_addr().unwrap().port();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::spawn(move || advertiser.run(&flag));
        (SocketAddr::from((Ipv4Addr::LOCALHOST, port)), running, handle)
    }

    fn probe_socket() -> UdpSocket {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        socket
    }

    #[test]
    fn test_answers_probe() {
        let (addr, running, handle) = spawn_advertiser("http://10.0.0.7:8003");
        let socket = probe_socket();

        socket.send_to(PROBE_PAYLOAD, addr).unwrap();
        let mut buf = [0u8; 128];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"http://10.0.0.7:8003");

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_ignores_other_payloads() {
        let (addr, running, handle) = spawn_advertiser("http://10.0.0.7:8003");
        let socket = probe_socket();

        socket.send_to(b"HELLO", addr).unwrap();
        let mut buf = [0u8; 128];
        assert!(socket.recv_from(&mut buf).is_err());

        // Still serving afterwards
        socket.send_to(PROBE_PAYLOAD, addr).unwrap();
        assert!(socket.recv_from(&mut buf).is_ok());

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_stops_when_flag_cleared() {
        let (_, running, handle) = spawn_advertiser("http://10.0.0.7:8003");
        running.store(false, Ordering::SeqCst);
        // Bounded by the 50ms read timeout
        handle.join().unwrap();
    }
}
