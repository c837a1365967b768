use std::io::{self, Write};
use std::path::Path;

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

/// `env_logger` target handing formatted records to the file sink.
pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Router log sink: records go through a channel and are appended to
/// `config::Log::path` by a dedicated single-threaded service.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    pub fn init_env_logger(&self) {
        let writer = self.create_async_writer();
        Builder::from_env(env_logger::Env::default())
            .filter(None, LevelFilter::Info)
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .init();
    }

    async fn open(&self) -> io::Result<BufWriter<File>> {
        let path = Path::new(&self.config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match self.open().await {
            Ok(file) => file,
            Err(e) => {
                // the logger itself is the sink, so report straight to stderr
                eprintln!("unable to open log file {}: {e}", self.config.path);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("failed to write log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // drain what was logged before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            if file.write_all(&data).await.is_err() {
                break;
            }
        }
        if let Err(e) = file.flush().await {
            eprintln!("failed to flush log file: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "log sync"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_writer_forwards_records() {
        let mut logger = Logger::new(config::Log {
            path: "router.log".to_string(),
        });
        let mut writer = logger.create_async_writer();

        assert_eq!(writer.write(b"rollout applied\n").unwrap(), 16);
        assert_eq!(logger.receiver.try_recv().unwrap(), b"rollout applied\n");
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("edgeroute-log-{}", std::process::id()));
        let path = dir.join("nested").join("router.log");
        let logger = Logger::new(config::Log {
            path: path.to_string_lossy().into_owned(),
        });

        let mut file = logger.open().await.unwrap();
        file.write_all(b"line\n").await.unwrap();
        file.flush().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"line\n");

        let _ = std::fs::remove_dir_all(dir);
    }
}
