use camino::Utf8Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UnixStream;
use vigil_core::protocol::{verify_codon_widths, WorkerMessage};

use super::MultiplexError;

/// Worker side of a channel. `stop` consumes the client so no message can
/// follow the final `STOPPED` line.
pub struct WorkerClient {
    writer: BufWriter<UnixStream>,
}

impl WorkerClient {
    pub async fn connect(socket_path: &Utf8Path) -> Result<Self, MultiplexError> {
        verify_codon_widths()?;
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            writer: BufWriter::new(stream),
        })
    }

    pub async fn send(&mut self, message: &WorkerMessage) -> std::io::Result<()> {
        let mut line = message.encode();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    pub async fn stop(mut self, passed: u64) -> std::io::Result<()> {
        self.send(&WorkerMessage::Stop(passed)).await?;
        self.writer.shutdown().await
    }
}
