//! Serial port link
//!
//! Async serial I/O through tokio-serial. The port is opened exclusively on
//! Unix (the serialport default), so a second client gets a busy error
//! instead of stealing bytes.

use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::interface::PanelLink;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace};

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 256;

/// Serial link to the panel controller
pub struct SerialLink {
    /// Open stream and its port name
    stream: Option<(SerialStream, String)>,

    /// Link name for logging
    name: String,
}

impl SerialLink {
    /// Create a closed serial link
    pub fn new() -> Self {
        Self {
            stream: None,
            name: "serial".to_string(),
        }
    }

    /// Port currently open, if any
    pub fn port(&self) -> Option<&str> {
        self.stream.as_ref().map(|(_, port)| port.as_str())
    }
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PanelLink for SerialLink {
    async fn open(&mut self, config: &SessionConfig) -> Result<()> {
        let port = config.port.clone().ok_or(LinkError::NoPortConfigured)?;
        if self.stream.is_some() {
            self.close().await?;
        }

        // Device nodes only exist as paths on Unix; COMx names do not
        #[cfg(unix)]
        if !std::path::Path::new(&port).exists() {
            return Err(LinkError::PortNotFound(port));
        }

        let stream = tokio_serial::new(&port, config.baud_rate)
            .timeout(config.timeout)
            .open_native_async()
            .map_err(|e| LinkError::from_serial(&port, e))?;

        info!(port = %port, baud = config.baud_rate, "Serial port opened");
        self.name = format!("serial:{port}");
        self.stream = Some((stream, port));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((stream, port)) = self.stream.take() {
            drop(stream);
            info!(port = %port, "Serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        let (stream, _) = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        match stream.read(&mut buf).await {
            Ok(0) => {
                // EOF - device unplugged
                self.stream = None;
                Err(LinkError::PortClosed)
            }
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                Ok(Some(Bytes::copy_from_slice(&buf[..n])))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "Serial read error");
                self.stream = None;
                Err(LinkError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let (stream, _) = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        debug!(size = data.len(), "Writing to serial port");

        if let Err(e) = stream.write_all(data).await {
            error!(error = %e, "Serial write error");
            self.stream = None;
            return Err(LinkError::WriteError(e.to_string()));
        }
        stream
            .flush()
            .await
            .map_err(|e| LinkError::WriteError(format!("Flush failed: {e}")))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port())
            .finish()
    }
}
