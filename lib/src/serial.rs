//! Blocking serial link with the timed read/write helpers the EMP
//! protocols need. The actual port driver is abstracted behind [`PortIo`]
//! so the engines can be exercised against a scripted port.

use std::io::{self, Read, Write};
use std::thread::sleep;
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};

/// Base unit for all protocol timeouts.
pub const TIMEOUT: Duration = Duration::from_millis(100);

/// The peer needs a moment on either side of a baudrate switch before the
/// next byte is emitted.
const BAUD_SETTLE: Duration = Duration::from_micros(1500);

pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// Byte-stream interface over the serial port driver.
pub trait PortIo: Send {
    /// Read whatever is available within `timeout`; 0 means the line went
    /// quiet.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<()>;
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
    fn set_dtr(&mut self, level: bool) -> Result<()>;
    fn set_rts(&mut self, level: bool) -> Result<()>;
}

/// Real serial port, 8N1 without flow control.
pub struct TtyPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl TtyPort {
    pub fn open(path: &str) -> Result<Self> {
        let inner = serialport::new(path, 9600)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(TIMEOUT)
            .open()
            .map_err(|e| Error::Port(e.to_string()))?;
        Ok(TtyPort { inner })
    }
}

impl PortIo for TtyPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.inner
            .set_timeout(timeout)
            .map_err(|e| Error::Port(e.to_string()))?;
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.inner
            .set_timeout(TIMEOUT)
            .map_err(|e| Error::Port(e.to_string()))?;
        self.inner.write_all(buf)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.inner
            .set_baud_rate(baud)
            .map_err(|e| Error::Port(e.to_string()))
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.inner
            .write_data_terminal_ready(level)
            .map_err(|e| Error::Port(e.to_string()))
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.inner
            .write_request_to_send(level)
            .map_err(|e| Error::Port(e.to_string()))
    }
}

pub struct SerialLink {
    port: Box<dyn PortIo>,
}

impl SerialLink {
    pub fn new(port: Box<dyn PortIo>) -> Self {
        SerialLink { port }
    }

    /// Power/reset pulse: DTR OFF then ON, RTS ON. The phone watches DTR,
    /// so the order must not change.
    pub fn power_pulse(&mut self) -> Result<()> {
        self.port.set_rts(false)?;
        self.port.set_dtr(false)?;
        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;
        Ok(())
    }

    pub fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        sleep(BAUD_SETTLE);
        self.port.set_baud_rate(baud)?;
        sleep(BAUD_SETTLE);
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.port.write(buf)
    }

    pub fn write_chunks(&mut self, buf: &[u8], chunk: usize) -> Result<()> {
        for part in buf.chunks(chunk) {
            self.port.write(part)?;
        }
        Ok(())
    }

    pub fn send_ack(&mut self) -> Result<()> {
        self.port.write(&[ACK])
    }

    pub fn send_nak(&mut self) -> Result<()> {
        self.port.write(&[NAK])
    }

    /// One ACK byte, then the frame. Loader-resident servers expect each
    /// command to be preceded by an ACK.
    pub fn send_ack_then(&mut self, frame: &[u8]) -> Result<()> {
        self.send_ack()?;
        self.port.write(frame)
    }

    pub fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.port.read(buf, timeout)
    }

    /// Gather bytes until `buf` is full or the line goes quiet. Errors if
    /// nothing arrived at all.
    pub fn wait_packet(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.port.read(&mut buf[total..], timeout)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total == 0 {
            return Err(Error::Timeout);
        }
        Ok(total)
    }

    /// Like [`wait_packet`](Self::wait_packet) but the whole buffer must
    /// fill.
    pub fn wait_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let n = self.wait_packet(buf, timeout)?;
        if n < buf.len() {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    pub fn wait_ack(&mut self, timeout: Duration) -> Result<()> {
        let mut resp = [0u8; 1];
        self.wait_exact(&mut resp, timeout)?;
        if resp[0] != ACK {
            return Err(Error::UnexpectedFrame {
                got: resp[0],
                expected: ACK,
            });
        }
        Ok(())
    }

    /// The bootrom answers each QH/QA/QD stage with a three-byte echo
    /// string. A mismatch is fatal unless the caller is running the
    /// skiperrors exploit path.
    pub fn wait_echo(&mut self, expected: &[u8; 3], timeout: Duration, skiperrors: bool) -> Result<()> {
        let mut buf = [0u8; 3];
        self.wait_exact(&mut buf, timeout)?;
        if &buf != expected {
            if skiperrors {
                return Ok(());
            }
            warn!(
                "unexpected bootrom echo {:02X?} (expected {})",
                buf,
                String::from_utf8_lossy(expected)
            );
            return Err(Error::LoaderRejected {
                stage: "bootrom echo",
            });
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockPort;
    use super::*;

    #[test]
    fn test_wait_packet_gathers_short_reads() {
        let port = MockPort::new(vec![vec![0x01, 0x02, 0x03]]);
        let mut link = SerialLink::new(Box::new(port));
        let mut buf = [0u8; 8];
        let n = link.wait_packet(&mut buf, TIMEOUT).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_wait_packet_times_out_on_silence() {
        let mut link = SerialLink::new(Box::new(MockPort::silent()));
        let mut buf = [0u8; 4];
        assert!(matches!(
            link.wait_packet(&mut buf, TIMEOUT),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_wait_ack() {
        let port = MockPort::new(vec![vec![ACK]]);
        let mut link = SerialLink::new(Box::new(port));
        link.wait_ack(TIMEOUT).unwrap();

        let port = MockPort::new(vec![vec![0x15]]);
        let mut link = SerialLink::new(Box::new(port));
        assert!(matches!(
            link.wait_ack(TIMEOUT),
            Err(Error::UnexpectedFrame { got: 0x15, .. })
        ));
    }

    #[test]
    fn test_wait_echo_skiperrors() {
        let port = MockPort::new(vec![b"XXX".to_vec()]);
        let mut link = SerialLink::new(Box::new(port));
        link.wait_echo(b"EsB", TIMEOUT, true).unwrap();

        let port = MockPort::new(vec![b"XXX".to_vec()]);
        let mut link = SerialLink::new(Box::new(port));
        assert!(link.wait_echo(b"EsB", TIMEOUT, false).is_err());
    }
}
