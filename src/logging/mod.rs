use std::{
    io::{self, Write},
    path::Path,
};

use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{config, config_error, core::AppResult};

/// `Write` half handed to env_logger; lines go through a channel so
/// logging never blocks on file I/O.
pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Owns the log channel. Once the writer is handed out, `run` ends on its
/// own when every writer is gone.
pub struct Logger {
    sender: Option<UnboundedSender<Vec<u8>>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender: Some(sender),
            receiver,
            config,
        }
    }

    /// Hand out the writer feeding this sink. Only one writer exists.
    pub fn take_async_writer(&mut self) -> AppResult<AsyncWriter> {
        self.sender
            .take()
            .map(|sender| AsyncWriter { sender })
            .ok_or_else(|| config_error!("Log writer already taken"))
    }

    /// Install env_logger as the global logger, writing into this sink.
    pub fn init_env_logger(&mut self) -> AppResult<()> {
        let level: LevelFilter = self
            .config
            .level
            .parse()
            .map_err(|_| config_error!("Invalid log level: {}", self.config.level))?;
        let writer = self.take_async_writer()?;
        Builder::from_env(env_logger::Env::default())
            .filter(None, level)
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init()
            .map_err(|e| config_error!("Logger already initialized: {}", e))
    }

    /// Write queued lines to the log file until `shutdown` flips to true or
    /// the writer is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let log_file_path = Path::new(&self.config.path);

        if let Some(parent) = log_file_path.parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_file_path)
                .await?,
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // drain what was queued before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            file.write_all(&data).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
