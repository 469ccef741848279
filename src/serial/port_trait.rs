//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Read half of a serial byte channel
#[async_trait]
pub trait SerialReader: Send {
    /// Read available bytes into `buf`; `Ok(0)` means the channel closed
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Write half of a serial byte channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialWriter: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Read half of a byte stream, usually a `tokio_serial::SerialStream`
pub struct StreamReader<R> {
    inner: R,
}

/// Write half of a byte stream
pub struct StreamWriter<W> {
    inner: W,
}

/// Split an opened stream into independently owned halves
pub fn split<S>(stream: S) -> (StreamReader<ReadHalf<S>>, StreamWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (reader, writer) = tokio::io::split(stream);
    (StreamReader { inner: reader }, StreamWriter { inner: writer })
}

#[async_trait]
impl<R> SerialReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }
}

#[async_trait]
impl<W> SerialWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::serial::SerialLink;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    type Chunk = io::Result<Vec<u8>>;

    /// Channel-backed serial port for driver tests
    ///
    /// Bytes pushed with [`push`](Self::push) are returned by the reader in
    /// order. Dropping the sender with [`disconnect`](Self::disconnect) makes
    /// the reader report end of stream.
    #[derive(Clone)]
    pub struct MockSerialPort {
        incoming: Arc<Mutex<Option<mpsc::UnboundedSender<Chunk>>>>,
        receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<Chunk>>>>,
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                incoming: Arc::new(Mutex::new(Some(tx))),
                receiver: Arc::new(Mutex::new(Some(rx))),
                written_data: Arc::new(Mutex::new(Vec::new())),
                write_error: Arc::new(Mutex::new(None)),
            }
        }

        /// Queue bytes for the reader
        pub fn push(&self, data: &[u8]) {
            if let Some(tx) = self.incoming.lock().unwrap().as_ref() {
                let _ = tx.send(Ok(data.to_vec()));
            }
        }

        /// Queue a read failure
        pub fn push_error(&self, kind: io::ErrorKind) {
            if let Some(tx) = self.incoming.lock().unwrap().as_ref() {
                let _ = tx.send(Err(io::Error::new(kind, "Mock read error")));
            }
        }

        /// Close the incoming side; the reader sees end of stream
        pub fn disconnect(&self) {
            self.incoming.lock().unwrap().take();
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }

        /// Build a link over this port; can be taken once
        pub fn link(&self) -> SerialLink {
            let rx = self
                .receiver
                .lock()
                .unwrap()
                .take()
                .expect("mock link already taken");
            SerialLink::new(
                Box::new(MockReader { rx, pending: Vec::new() }),
                Box::new(MockWriter {
                    written_data: Arc::clone(&self.written_data),
                    write_error: Arc::clone(&self.write_error),
                }),
                "/dev/mock",
            )
        }
    }

    struct MockReader {
        rx: mpsc::UnboundedReceiver<Chunk>,
        pending: Vec<u8>,
    }

    #[async_trait]
    impl SerialReader for MockReader {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv().await {
                    Some(Ok(data)) => self.pending = data,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(0),
                }
            }
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    struct MockWriter {
        written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    #[async_trait]
    impl SerialWriter for MockWriter {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.written_data.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mock_reader_delivers_in_order() {
        let port = MockSerialPort::new();
        let (mut reader, _writer, _) = port.link().into_parts();

        port.push(&[1, 2, 3]);
        port.push(&[4]);

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 4);

        port.disconnect();
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_writer_records_and_fails() {
        let port = MockSerialPort::new();
        let (_reader, mut writer, _) = port.link().into_parts();

        writer.write_all(&[0xAA, 0x55]).await.unwrap();
        assert_eq!(port.get_written_data(), vec![vec![0xAA, 0x55]]);

        port.set_write_error(io::ErrorKind::BrokenPipe);
        let err = writer.write_all(&[1]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_stream_halves_pass_bytes_through() {
        let stream = tokio_test::io::Builder::new()
            .read(&[0xAA, 0x55, 0x00, 0x00])
            .write(&[0xAA, 0x55, 0x04])
            .build();
        let (mut reader, mut writer) = split(stream);

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0x55, 0x00, 0x00]);

        writer.write_all(&[0xAA, 0x55, 0x04]).await.unwrap();
        writer.flush().await.unwrap();
    }
}
