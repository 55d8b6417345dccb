//! Speech-service stream client.
//!
//! One client instance owns one bidirectional connection. All outgoing
//! traffic funnels through a single writer worker so control events, audio
//! and tool results are never interleaved mid-unit; all incoming traffic is
//! consumed by a single reader worker and surfaced as an ordered event
//! sequence with exactly one consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{
    AudioOutputConfig, ContentStart, ControlEvent, IncomingEvent, MediaConfig, PromptStart, Role,
    ToolConfiguration, ToolEntry, ToolSpec, content_name, decode_event,
};
use super::transport::StreamTransport;
use super::{AudioFrame, SpeechConfig, SpeechError};

/// How long `close` waits for the writer to drain queued events before the
/// reader is torn down.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A unit of outgoing traffic. A `Block` is written as consecutive frames
/// with nothing interleaved, which is what keeps tool-result content blocks
/// intact while audio is flowing.
#[derive(Debug)]
enum Outbound {
    Single(ControlEvent),
    Block(Vec<ControlEvent>),
    /// Close the sink after everything queued ahead of it has been written.
    Shutdown,
}

/// Cloneable handle onto the single outgoing send path.
#[derive(Clone)]
pub struct SpeechSender {
    prompt_name: String,
    open: Arc<AtomicBool>,
    tx: mpsc::Sender<Outbound>,
}

impl SpeechSender {
    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    /// Send one control event.
    pub async fn send_control(&self, event: ControlEvent) -> Result<(), SpeechError> {
        self.tx
            .send(Outbound::Single(event))
            .await
            .map_err(|_| SpeechError::ChannelClosed)
    }

    /// Send a sequence of control events as one indivisible unit.
    pub async fn send_block(&self, events: Vec<ControlEvent>) -> Result<(), SpeechError> {
        self.tx
            .send(Outbound::Block(events))
            .await
            .map_err(|_| SpeechError::ChannelClosed)
    }

    /// Send one audio frame into the named AUDIO content block.
    ///
    /// Audio before the open handshake has completed is a protocol
    /// violation and is rejected here rather than corrupting the stream.
    pub async fn send_audio(
        &self,
        audio_content_name: &str,
        frame: &AudioFrame,
    ) -> Result<(), SpeechError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SpeechError::NotOpen);
        }
        let event = ControlEvent::AudioInput {
            prompt_name: self.prompt_name.clone(),
            content_name: audio_content_name.to_string(),
            content: BASE64_STANDARD.encode(&frame.pcm),
        };
        self.send_control(event).await
    }
}

/// The upstream stream client.
pub struct SpeechStreamClient {
    config: SpeechConfig,
    prompt_name: String,
    transport: Option<Box<dyn StreamTransport>>,
    open: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    control_tx: Option<mpsc::Sender<Outbound>>,
    events_rx: Option<mpsc::Receiver<IncomingEvent>>,
    writer_handle: Option<JoinHandle<()>>,
    reader_handle: Option<JoinHandle<()>>,
}

impl SpeechStreamClient {
    pub fn new(config: SpeechConfig, transport: Box<dyn StreamTransport>) -> Self {
        Self {
            config,
            prompt_name: content_name("prompt"),
            transport: Some(transport),
            open: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            control_tx: None,
            events_rx: None,
            writer_handle: None,
            reader_handle: None,
        }
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Connect and run the open handshake: `sessionStart`, `promptStart`
    /// carrying the tool schema, then the system prompt as a TEXT content
    /// block. No audio can be sent until this returns.
    pub async fn open(
        &mut self,
        system_prompt: &str,
        tools: &[ToolSpec],
    ) -> Result<(), SpeechError> {
        if self.open.load(Ordering::SeqCst) {
            return Err(SpeechError::AlreadyOpen);
        }
        let mut transport = self.transport.take().ok_or(SpeechError::AlreadyOpen)?;
        let (mut sink, mut source) = transport.connect().await?;

        let (control_tx, mut control_rx) =
            mpsc::channel::<Outbound>(self.config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel::<IncomingEvent>(self.config.channel_capacity);

        // Writer worker: the single logical sender toward the service.
        let writer_open = self.open.clone();
        let writer_handle = tokio::spawn(async move {
            while let Some(outbound) = control_rx.recv().await {
                let events = match outbound {
                    Outbound::Single(event) => vec![event],
                    Outbound::Block(events) => events,
                    Outbound::Shutdown => break,
                };
                for event in events {
                    let frame = match event.to_wire() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(kind = event.kind(), error = %e, "failed to encode event");
                            continue;
                        }
                    };
                    tracing::trace!(kind = event.kind(), "sending event to speech service");
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!(error = %e, "write to speech service failed");
                        writer_open.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
            // Sender side dropped: orderly shutdown.
            let _ = sink.close().await;
        });

        // Reader worker: the only consumer of the upstream connection.
        let closed = self.closed.clone();
        let output_rate = self.config.output_sample_rate_hz;
        let reader_handle = tokio::spawn(async move {
            loop {
                match source.next_frame().await {
                    Some(Ok(raw)) => match decode_event(&raw, output_rate) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => tracing::trace!("skipping bookkeeping event"),
                        Err(e) => {
                            // One bad frame is dropped; the stream goes on.
                            tracing::warn!(error = %e, "dropping undecodable frame");
                        }
                    },
                    Some(Err(e)) => {
                        if !closed.load(Ordering::SeqCst) {
                            let _ = event_tx
                                .send(IncomingEvent::Disconnected {
                                    message: e.to_string(),
                                })
                                .await;
                        }
                        break;
                    }
                    None => {
                        if !closed.load(Ordering::SeqCst) {
                            let _ = event_tx
                                .send(IncomingEvent::Disconnected {
                                    message: "connection closed by service".to_string(),
                                })
                                .await;
                        }
                        break;
                    }
                }
            }
            tracing::debug!("speech service reader stopped");
        });

        // Handshake, strictly ordered and indivisible.
        let system_content = content_name("content");
        let handshake = vec![
            ControlEvent::SessionStart {
                inference_configuration: self.config.inference(),
            },
            ControlEvent::PromptStart(self.build_prompt_start(tools)),
            ControlEvent::ContentStart(ContentStart::text(
                &self.prompt_name,
                &system_content,
                Role::System,
            )),
            ControlEvent::TextInput {
                prompt_name: self.prompt_name.clone(),
                content_name: system_content.clone(),
                content: system_prompt.to_string(),
            },
            ControlEvent::ContentEnd {
                prompt_name: self.prompt_name.clone(),
                content_name: system_content,
            },
        ];
        control_tx
            .send(Outbound::Block(handshake))
            .await
            .map_err(|_| SpeechError::ChannelClosed)?;

        self.control_tx = Some(control_tx);
        self.events_rx = Some(event_rx);
        self.writer_handle = Some(writer_handle);
        self.reader_handle = Some(reader_handle);
        self.open.store(true, Ordering::SeqCst);

        tracing::info!(prompt_name = %self.prompt_name, "speech session opened");
        Ok(())
    }

    /// Handle onto the single outgoing send path. Available once `open`
    /// has succeeded.
    pub fn sender(&self) -> Result<SpeechSender, SpeechError> {
        let tx = self.control_tx.as_ref().ok_or(SpeechError::NotOpen)?;
        Ok(SpeechSender {
            prompt_name: self.prompt_name.clone(),
            open: self.open.clone(),
            tx: tx.clone(),
        })
    }

    /// The ordered incoming event sequence. Single consumer: the first call
    /// takes the receiver, later calls return `None`.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<IncomingEvent>> {
        self.events_rx.take()
    }

    /// Close the connection. Idempotent; both the client-disconnect and the
    /// upstream-error path may call this.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);

        // The shutdown marker queues behind everything already sent (the
        // session-end sequence among them), so the writer drains and then
        // closes the sink.
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(Outbound::Shutdown).await;
        }
        if let Some(writer) = self.writer_handle.take()
            && tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, writer).await.is_err()
        {
            tracing::warn!("writer did not drain in time during close");
        }
        if let Some(reader) = self.reader_handle.take() {
            reader.abort();
        }
        tracing::info!(prompt_name = %self.prompt_name, "speech session closed");
    }

    fn build_prompt_start(&self, tools: &[ToolSpec]) -> PromptStart {
        PromptStart {
            prompt_name: self.prompt_name.clone(),
            text_output_configuration: MediaConfig::text_plain(),
            audio_output_configuration: AudioOutputConfig {
                media_type: "audio/lpcm".to_string(),
                sample_rate_hertz: self.config.output_sample_rate_hz,
                sample_size_bits: 16,
                channel_count: 1,
                voice_id: self.config.voice_id.clone(),
                encoding: "base64".to_string(),
                audio_type: "SPEECH".to_string(),
            },
            tool_use_output_configuration: MediaConfig::json(),
            tool_configuration: ToolConfiguration {
                tools: tools
                    .iter()
                    .map(|spec| ToolEntry { tool_spec: spec.clone() })
                    .collect(),
            },
        }
    }
}
