//! Trait abstraction for link operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::LinkError;

/// An open, readable link
#[async_trait]
pub trait LineSource: Send {
    /// Append bytes up to and including the next `\n` to `buf`
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
}

/// Something that can open a [`LineSource`] for an address
#[async_trait]
pub trait Connector: Send {
    async fn open(&mut self, address: &str) -> Result<Box<dyn LineSource>, LinkError>;
}

/// Opens serial ports with tokio-serial at a fixed baud rate (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&mut self, address: &str) -> Result<Box<dyn LineSource>, LinkError> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(address, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| map_open_error(address, e))?;

        Ok(Box::new(SerialLineSource {
            reader: BufReader::new(port),
        }))
    }
}

fn map_open_error(address: &str, e: tokio_serial::Error) -> LinkError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice
        | tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => LinkError::NotFound(address.to_string()),
        _ => LinkError::Open {
            address: address.to_string(),
            reason: e.description,
        },
    }
}

/// Buffered reader over an open serial port
struct SerialLineSource {
    reader: BufReader<tokio_serial::SerialStream>,
}

#[async_trait]
impl LineSource for SerialLineSource {
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.reader.read_until(b'\n', buf).await
    }
}
