//! Out-of-band processing channel to the server.
//!
//! The node never calibrates: every raw sample goes to the server's
//! processing endpoint and comes back as an engineering value. The wire
//! binding is one JSON object per line over TCP with a hard timeout; a
//! dedicated circuit breaker (threshold 3) guards the call at the poller.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use gaia_common::error::ErrorCode;
use gaia_common::payload::{ProcessingRequest, ProcessingResponse};
use thiserror::Error;
use tracing::trace;

/// Processing call failure.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    #[error("processing request timed out")]
    Timeout,

    #[error("processing transport failed: {0}")]
    Io(String),

    #[error("processing response invalid: {0}")]
    InvalidResponse(String),
}

impl ProcessingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout => ErrorCode::PROCESSING_TIMEOUT,
            _ => ErrorCode::PROCESSING_FAILED,
        }
    }
}

/// Synchronous request/response to the server's processing endpoint.
pub trait ProcessingClient {
    fn process(&mut self, request: &ProcessingRequest)
        -> Result<ProcessingResponse, ProcessingError>;
}

/// Newline-delimited JSON over TCP.
pub struct TcpProcessingClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProcessingClient {
    pub fn new(host: &str, port: u16, timeout_ms: u64) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

impl ProcessingClient for TcpProcessingClient {
    fn process(
        &mut self,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResponse, ProcessingError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ProcessingError::Io(e.to_string()))?
            .next()
            .ok_or_else(|| ProcessingError::Io("no address resolved".to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| ProcessingError::Io(e.to_string()))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| ProcessingError::Io(e.to_string()))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| ProcessingError::Io(e.to_string()))?;

        let mut line = serde_json::to_vec(request)
            .map_err(|e| ProcessingError::InvalidResponse(e.to_string()))?;
        line.push(b'\n');

        let mut writer = &stream;
        writer
            .write_all(&line)
            .map_err(map_io_timeout)?;

        let mut reader = BufReader::new(&stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).map_err(map_io_timeout)?;
        trace!(bytes = response_line.len(), "processing response received");

        serde_json::from_str(&response_line)
            .map_err(|e| ProcessingError::InvalidResponse(e.to_string()))
    }
}

fn map_io_timeout(e: std::io::Error) -> ProcessingError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProcessingError::Timeout,
        _ => ProcessingError::Io(e.to_string()),
    }
}

/// Scriptable processing double for tests.
pub struct MockProcessing {
    /// Next calls fail while > 0.
    fail_count: u32,
    /// Fixed response; when `None`, echoes `raw × scale`.
    response: Option<ProcessingResponse>,
    pub scale: f64,
    pub requests: Vec<ProcessingRequest>,
}

impl MockProcessing {
    pub fn new() -> Self {
        Self {
            fail_count: 0,
            response: None,
            scale: 0.1,
            requests: Vec::new(),
        }
    }

    pub fn fail_next(&mut self, n: u32) {
        self.fail_count = n;
    }

    pub fn respond_with(&mut self, response: ProcessingResponse) {
        self.response = Some(response);
    }
}

impl Default for MockProcessing {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingClient for MockProcessing {
    fn process(
        &mut self,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResponse, ProcessingError> {
        self.requests.push(request.clone());
        if self.fail_count > 0 {
            self.fail_count -= 1;
            return Err(ProcessingError::Timeout);
        }
        Ok(self.response.clone().unwrap_or(ProcessingResponse {
            value: request.raw_value * self.scale,
            unit: "°C".to_string(),
            quality: "good".to_string(),
            valid: true,
            error_message: String::new(),
        }))
    }
}

/// Shared handle so tests keep scripting access after the poller takes
/// ownership. Single-threaded.
#[derive(Clone, Default)]
pub struct SharedMockProcessing(std::rc::Rc<std::cell::RefCell<MockProcessing>>);

impl SharedMockProcessing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, MockProcessing> {
        self.0.borrow_mut()
    }
}

impl ProcessingClient for SharedMockProcessing {
    fn process(
        &mut self,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResponse, ProcessingError> {
        self.0.borrow_mut().process(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn request() -> ProcessingRequest {
        ProcessingRequest {
            esp_id: "ESP_AB12CD".to_string(),
            pin: 4,
            kind: "temperature_ds18b20".to_string(),
            raw_value: 1360.0,
            ts: 1_700_000_000,
            metadata: serde_json::json!({"sensor_name": "T1"}),
        }
    }

    #[test]
    fn tcp_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(&stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let req: ProcessingRequest = serde_json::from_str(&line).unwrap();
            assert_eq!(req.pin, 4);

            let response = ProcessingResponse {
                value: req.raw_value / 16.0,
                unit: "°C".to_string(),
                quality: "good".to_string(),
                valid: true,
                error_message: String::new(),
            };
            let mut out = serde_json::to_vec(&response).unwrap();
            out.push(b'\n');
            (&stream).write_all(&out).unwrap();
        });

        let mut client = TcpProcessingClient::new("127.0.0.1", addr.port(), 2_000);
        let response = client.process(&request()).unwrap();
        assert!(response.valid);
        assert!((response.value - 85.0).abs() < 1e-9);
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_io_error() {
        // Port 1 is essentially never listening.
        let mut client = TcpProcessingClient::new("127.0.0.1", 1, 300);
        let err = client.process(&request()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROCESSING_FAILED);
    }

    #[test]
    fn mock_scripting() {
        let mut mock = MockProcessing::new();
        mock.fail_next(1);
        assert!(mock.process(&request()).is_err());
        let response = mock.process(&request()).unwrap();
        assert!(response.valid);
        assert_eq!(mock.requests.len(), 2);
    }
}
