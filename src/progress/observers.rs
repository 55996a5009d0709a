// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Built-in observers

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use super::{DeliveryError, Observer, ProgressEvent};

/// Forwards events into a tokio channel
pub struct ChannelObserver {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Writes one JSON object per line to an async writer
///
/// This is the push channel for a remote observer: point it at a file, a
/// pipe, or stdout.
pub struct JsonLinesObserver<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesObserver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl JsonLinesObserver<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Observer for JsonLinesObserver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Reports events through tracing
#[derive(Debug, Default)]
pub struct LogObserver;

#[async_trait]
impl Observer for LogObserver {
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError> {
        match event {
            ProgressEvent::StageStarted { index, title } => {
                info!("step {} '{}' started", index, title)
            }
            ProgressEvent::StageSucceeded {
                index,
                title,
                elapsed_ms,
            } => info!("step {} '{}' succeeded in {}ms", index, title, elapsed_ms),
            ProgressEvent::StageFailed { diagnostic, .. } => error!("{}", diagnostic),
            ProgressEvent::PipelineCompleted { final_status, .. } => {
                info!("pipeline {}", final_status)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunStatus;

    #[tokio::test]
    async fn test_json_lines_observer_writes_one_line_per_event() {
        let observer = JsonLinesObserver::new(Vec::new());
        observer
            .deliver(&ProgressEvent::StageStarted {
                index: 0,
                title: "Moving Input Image".into(),
            })
            .await
            .unwrap();
        observer
            .deliver(&ProgressEvent::PipelineCompleted {
                final_status: RunStatus::Succeeded,
                diagnostic: None,
            })
            .await
            .unwrap();

        let written = observer.writer.into_inner();
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let last: ProgressEvent = serde_json::from_str(lines[1]).unwrap();
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_observer_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let observer = ChannelObserver::new(tx);
        let err = observer
            .deliver(&ProgressEvent::StageStarted {
                index: 0,
                title: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Closed));
    }
}
