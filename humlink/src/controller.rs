//! High-level controller interface

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use humlink_core::constants::{sizes, CONTROLLER_MASK, DEFAULT_RESPONSE_TIMEOUT_MS, NOTIFY_COMMAND, RSP_HEADER_MARKER};
use humlink_core::frame::payload;
use humlink_core::layout::common;
use humlink_core::response::{
    frame_complete, offsets, variant_size, Channels, ControllerStatus, FirmwareVersion, ForceFrame, Notify,
    SerialNumber,
};
use humlink_core::{Command, CommandFrame, Response};
use humlink_transport::{self as transport, SerialChannel, SerialConfig, SerialParams};

use crate::error::{ProtocolError, ProtocolResult, Result};
use crate::info::ControllerInfo;

/// Unsolicited messages kept while a command is in flight
const MAX_PENDING_EVENTS: usize = 256;

/// Unsolicited message received while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Frame(ForceFrame),
    Notify(Notify),
}

/// Pad controller session
///
/// Runs one request/response exchange at a time over a [`SerialChannel`]:
/// stream events already received are queued and other stale input is
/// discarded, the command is written, and bytes are read from the receive
/// buffer until one response frame is complete or the response timeout
/// passes. Nothing is retried, and a malformed response never closes the
/// channel.
///
/// # Examples
///
/// ```no_run
/// use humlink::{ControllerSession, SerialConfig};
///
/// fn main() -> humlink::Result<()> {
///     let mut session = ControllerSession::open(SerialConfig::new("/dev/ttyUSB0"))?;
///
///     let serial = session.get_serial_number()?;
///     println!("Controller: {}", serial);
///
///     session.close();
///     Ok(())
/// }
/// ```
pub struct ControllerSession {
    channel: SerialChannel,
    timeout: Duration,
    target_mask: u16,
    pending: VecDeque<StreamEvent>,
    /// Start of a frame still arriving when a command was sent
    partial: BytesMut,
}

impl ControllerSession {
    /// Create a session over `channel`, open or not
    pub fn new(channel: SerialChannel) -> Self {
        Self {
            channel,
            timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            target_mask: CONTROLLER_MASK,
            pending: VecDeque::new(),
            partial: BytesMut::new(),
        }
    }

    /// Open the serial port described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened.
    pub fn open(config: SerialConfig) -> Result<Self> {
        let mut channel = SerialChannel::new(config);
        channel.open()?;
        Ok(Self::new(channel))
    }

    /// Set response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address commands to other pads (default: the controller)
    pub fn with_target_mask(mut self, target_mask: u16) -> Self {
        self.target_mask = target_mask;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn channel(&self) -> &SerialChannel {
        &self.channel
    }

    /// Close the channel and drop queued stream events
    pub fn close(&mut self) {
        self.channel.close();
        self.pending.clear();
        self.partial.clear();
    }

    pub fn into_channel(self) -> SerialChannel {
        self.channel
    }

    // Identity

    /// Read the controller serial number
    pub fn get_serial_number(&mut self) -> ProtocolResult<String> {
        let serial = self.serial_number()?;
        debug!(serial = %serial.serial_id, "Serial number received");
        Ok(serial.serial_id)
    }

    pub fn get_firmware_version(&mut self) -> ProtocolResult<FirmwareVersion> {
        match self.request(self.frame(Command::GetFirmwareVersion))? {
            Response::FirmwareVersion(version) => Ok(version),
            other => Err(unexpected("FirmwareVersion", &other)),
        }
    }

    /// Serial number and firmware versions
    pub fn get_controller_info(&mut self) -> ProtocolResult<ControllerInfo> {
        let serial = self.serial_number()?;
        let firmware = self.get_firmware_version()?;

        let info = ControllerInfo::new(serial, firmware);
        info!("{}", info);
        Ok(info)
    }

    pub fn get_status(&mut self) -> ProtocolResult<ControllerStatus> {
        match self.request(self.frame(Command::GetStatus))? {
            Response::Status(status) => {
                if status.has_errors() {
                    warn!(flags = status.error_flags, "Controller reports errors");
                }
                Ok(status)
            }
            other => Err(unexpected("Status", &other)),
        }
    }

    /// Run the controller self test; results show up in [`get_status`](Self::get_status)
    pub fn run_self_test(&mut self) -> ProtocolResult<()> {
        self.command(Command::RunSelfTest)
    }

    // Acquisition settings

    /// Sampling rate in Hz
    pub fn get_sample_rate(&mut self) -> ProtocolResult<u16> {
        match self.request(self.frame(Command::GetSampleRate))? {
            Response::SampleRate(r) => Ok(r.rate),
            other => Err(unexpected("SampleRate", &other)),
        }
    }

    pub fn set_sample_rate(&mut self, rate: u16) -> ProtocolResult<()> {
        debug!(rate, "Setting sample rate");
        let frame = self.frame_with(Command::SetSampleRate, payload::sample_rate(rate))?;
        self.expect_ack(frame)
    }

    pub fn get_channel_mask(&mut self) -> ProtocolResult<Channels> {
        match self.request(self.frame(Command::GetChannelMask))? {
            Response::ChannelMask(m) => Ok(m.channels),
            other => Err(unexpected("ChannelMask", &other)),
        }
    }

    pub fn set_channel_mask(&mut self, channels: Channels) -> ProtocolResult<()> {
        debug!(mask = channels.bits(), "Setting channel mask");
        let frame = self.frame_with(Command::SetChannelMask, payload::channel_mask(channels.bits()))?;
        self.expect_ack(frame)
    }

    /// Upload a raw calibration table
    pub fn set_calibration(&mut self, table: &[u8]) -> ProtocolResult<()> {
        debug!(len = table.len(), "Uploading calibration");
        let frame = self.frame_with(Command::SetCalibration, Bytes::copy_from_slice(table))?;
        self.expect_ack(frame)
    }

    // Acquisition

    pub fn start_acquisition(&mut self) -> ProtocolResult<()> {
        self.command(Command::StartAcquisition)
    }

    pub fn stop_acquisition(&mut self) -> ProtocolResult<()> {
        self.command(Command::StopAcquisition)
    }

    /// Discard frames cached on the controller
    pub fn clear_cache(&mut self) -> ProtocolResult<()> {
        self.command(Command::ClearCache)
    }

    /// Fetch the oldest cached frame
    pub fn get_frame(&mut self) -> ProtocolResult<ForceFrame> {
        match self.request(self.frame(Command::GetFrame))? {
            Response::Frame(frame) => Ok(frame),
            other => Err(unexpected("Frame", &other)),
        }
    }

    // Streaming

    /// Start live streaming; read samples with [`next_stream_event`](Self::next_stream_event)
    pub fn start_stream(&mut self) -> ProtocolResult<()> {
        debug!("Starting stream...");
        match self.request(self.frame(Command::StartStream))? {
            Response::Ack(_) => Ok(()),
            // Some firmware answers with the first sample instead of an ACK
            Response::Frame(frame) => {
                self.queue(StreamEvent::Frame(frame));
                Ok(())
            }
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Stop live streaming
    ///
    /// Events received before the controller stopped stay readable through
    /// [`next_stream_event`](Self::next_stream_event).
    pub fn stop_stream(&mut self) -> ProtocolResult<()> {
        debug!("Stopping stream...");
        self.command(Command::StopStream)
    }

    /// Next unsolicited frame or notification
    ///
    /// Events that arrived before or during a command exchange are returned
    /// first. `Duration::MAX` waits without a deadline.
    pub fn next_stream_event(&mut self, timeout: Duration) -> ProtocolResult<StreamEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        self.ensure_open()?;

        let deadline = Instant::now().checked_add(timeout);
        match self.read_frame(deadline, timeout)? {
            Response::Frame(frame) => Ok(StreamEvent::Frame(frame)),
            Response::Notify(notify) => Ok(StreamEvent::Notify(notify)),
            other => Err(unexpected("Frame or Notify", &other)),
        }
    }

    // Link settings

    /// Change the controller's serial line settings
    ///
    /// The controller switches after acknowledging; reopen the channel with
    /// the same settings to keep talking to it.
    pub fn set_serial_params(&mut self, params: &SerialParams) -> ProtocolResult<()> {
        let value = params.to_string();
        info!(params = %value, "Changing controller serial parameters");
        let frame = self.frame_with(Command::SetSerialParams, payload::serial_params(&value))?;
        self.expect_ack(frame)
    }

    pub fn set_wifi_credentials(&mut self, ssid: &str, password: &str) -> ProtocolResult<()> {
        info!(ssid, "Setting Wi-Fi credentials");
        let frame = self.frame_with(Command::SetWifiSsid, payload::wifi_credentials(ssid, password))?;
        self.expect_ack(frame)
    }

    // Helper methods

    fn ensure_open(&self) -> ProtocolResult<()> {
        if !self.channel.is_open() {
            return Err(ProtocolError::NotOpen);
        }
        Ok(())
    }

    fn frame(&self, command: Command) -> CommandFrame {
        CommandFrame::new(command).to(self.target_mask)
    }

    fn frame_with(&self, command: Command, payload: Bytes) -> ProtocolResult<CommandFrame> {
        CommandFrame::with_payload(command, payload)
            .map(|frame| frame.to(self.target_mask))
            .map_err(ProtocolError::Encode)
    }

    fn serial_number(&mut self) -> ProtocolResult<SerialNumber> {
        match self.request(self.frame(Command::GetSerialNumber))? {
            Response::SerialNumber(serial) => Ok(serial),
            other => Err(unexpected("SerialNumber", &other)),
        }
    }

    fn command(&mut self, command: Command) -> ProtocolResult<()> {
        debug!(%command, "Sending command");
        self.expect_ack(self.frame(command))
    }

    fn expect_ack(&mut self, frame: CommandFrame) -> ProtocolResult<()> {
        match self.request(frame)? {
            Response::Ack(_) => Ok(()),
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Exchange `frame`, turning a NACK into [`ProtocolError::Rejected`]
    fn request(&mut self, frame: CommandFrame) -> ProtocolResult<Response> {
        let command = frame.command;

        match self.exchange(frame)? {
            Response::Nack(nack) => {
                warn!(%command, error_code = nack.error_code, "Command rejected");
                Err(ProtocolError::Rejected {
                    command,
                    pad_address: nack.pad_address,
                    error_code: nack.error_code,
                })
            }
            response => Ok(response),
        }
    }

    fn exchange(&mut self, frame: CommandFrame) -> ProtocolResult<Response> {
        self.ensure_open()?;

        self.drain_stale();

        let command = frame.command;
        let data = frame.encode();
        trace!(%command, bytes = ?&data[..], "Sending");

        self.channel
            .write(&data)
            .map_err(|source| ProtocolError::WriteFailed { command, source })?;

        let timeout = self.timeout;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let response = self.read_frame(deadline, timeout)?;

            // Samples and notifications keep arriving while streaming
            if response.is_unsolicited() && command != Command::StartStream {
                if let Some(event) = stream_event(&response) {
                    self.queue(event);
                }
                continue;
            }

            trace!(%command, %response, "Received");
            return Ok(response);
        }
    }

    /// Queue stream events already received and discard other stale input
    ///
    /// A frame cut off at the end of the buffered bytes is kept and completed
    /// by the next read.
    fn drain_stale(&mut self) {
        let mut stale = std::mem::take(&mut self.partial);
        stale.extend_from_slice(&self.channel.buffer().take_available(usize::MAX));
        if stale.is_empty() {
            return;
        }

        let (responses, skipped) = split_frames(&mut stale);
        for response in responses {
            match stream_event(&response) {
                Some(event) => self.queue(event),
                None => debug!(%response, "Discarding stale response"),
            }
        }

        if skipped > 0 {
            warn!(skipped, "Discarding unframed input");
        }
        if !stale.is_empty() {
            trace!(len = stale.len(), "Keeping partial frame");
        }
        self.partial = stale;
    }

    fn queue(&mut self, event: StreamEvent) {
        if self.pending.len() >= MAX_PENDING_EVENTS {
            warn!("Stream event queue full, dropping oldest event");
            self.pending.pop_front();
        }
        self.pending.push_back(event);
    }

    /// Read exactly one response frame from the receive buffer
    fn read_frame(&mut self, deadline: Option<Instant>, timeout: Duration) -> ProtocolResult<Response> {
        let mut frame = std::mem::take(&mut self.partial);
        frame.reserve(sizes::MAX_RESPONSE);

        while frame.len() < sizes::MIN_RESPONSE {
            let need = sizes::MIN_RESPONSE - frame.len();
            let chunk = self.take(need, need, deadline, timeout, frame.len())?;
            frame.extend_from_slice(&chunk);
            resync(&mut frame);
        }

        let code = frame[common::COMMAND.offset];
        let expected = expected_len(code);

        loop {
            if frame.len() >= expected {
                break;
            }

            // ACK/NACK shapes end before the variant size
            if frame_complete(&frame) && Response::decode(&frame).is_ok() {
                break;
            }

            let boundary = next_boundary(frame.len(), code, expected);
            let chunk = self.take(1, boundary - frame.len(), deadline, timeout, frame.len())?;
            frame.extend_from_slice(&chunk);
        }

        trace!(len = frame.len(), bytes = ?&frame[..], "Response frame");

        Response::decode(&frame).map_err(|e| {
            debug!(error = %e, "Discarding malformed response");
            ProtocolError::Decode(e)
        })
    }

    fn take(
        &self,
        min: usize,
        max: usize,
        deadline: Option<Instant>,
        timeout: Duration,
        received: usize,
    ) -> ProtocolResult<Bytes> {
        let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));

        match self.channel.buffer().take_at_least(min, max, remaining) {
            Ok(bytes) => Ok(bytes),
            Err(transport::Error::ReadTimeout { .. }) => Err(ProtocolError::Timeout { timeout, received }),
            Err(_) => Err(ProtocolError::ChannelClosed),
        }
    }
}

/// Offset of the first possible response header in `buf`
fn header_offset(buf: &[u8]) -> usize {
    let header = RSP_HEADER_MARKER.to_be_bytes();

    match buf.windows(2).position(|w| w == header) {
        Some(pos) => pos,
        None if buf.last() == Some(&header[0]) => buf.len() - 1,
        None => buf.len(),
    }
}

/// Drop bytes ahead of the next response header
fn resync(frame: &mut BytesMut) {
    let start = header_offset(frame);
    if start > 0 {
        warn!(skipped = start, "Skipping bytes ahead of response header");
        frame.advance(start);
    }
}

/// Largest frame a response with `code` can be
fn expected_len(code: u8) -> usize {
    if code == NOTIFY_COMMAND {
        return offsets::notify::SIZE;
    }

    variant_size(code).map_or(offsets::nack::SIZE, |size| size.max(offsets::nack::SIZE))
}

/// Next length at which a response with `code` may be complete
fn next_boundary(len: usize, code: u8, expected: usize) -> usize {
    [offsets::ack::SIZE, offsets::nack::SIZE, variant_size(code).unwrap_or(expected)]
        .into_iter()
        .filter(|&size| size > len && size <= expected)
        .min()
        .unwrap_or(expected)
}

/// Shortest complete, valid frame at the start of `buf`
fn leading_frame(buf: &[u8]) -> Option<(usize, Response)> {
    let code = buf[common::COMMAND.offset];
    let mut lengths = [
        offsets::ack::SIZE,
        offsets::nack::SIZE,
        variant_size(code).unwrap_or(offsets::nack::SIZE),
    ];
    lengths.sort_unstable();

    lengths.into_iter().filter(|&n| n <= buf.len()).find_map(|n| {
        let frame = &buf[..n];
        if !frame_complete(frame) {
            return None;
        }
        Response::decode(frame).ok().map(|response| (n, response))
    })
}

/// Split every complete frame off the front of `buf`
///
/// Returns the frames and the number of bytes skipped as garbage. A frame
/// that may still be arriving stays in `buf`.
fn split_frames(buf: &mut BytesMut) -> (Vec<Response>, usize) {
    let mut frames = Vec::new();
    let mut skipped = 0;

    loop {
        let start = header_offset(buf);
        skipped += start;
        buf.advance(start);

        if buf.len() < sizes::MIN_RESPONSE {
            break;
        }

        match leading_frame(buf) {
            Some((len, response)) => {
                buf.advance(len);
                frames.push(response);
            }
            None if buf.len() < expected_len(buf[common::COMMAND.offset]) => break,
            None => {
                buf.advance(1);
                skipped += 1;
            }
        }
    }

    (frames, skipped)
}

fn stream_event(response: &Response) -> Option<StreamEvent> {
    match response {
        Response::Frame(frame) => Some(StreamEvent::Frame(*frame)),
        Response::Notify(notify) => Some(StreamEvent::Notify(*notify)),
        _ => None,
    }
}

fn unexpected(expected: &'static str, got: &Response) -> ProtocolError {
    warn!(expected, got = %got, "Unexpected response");
    ProtocolError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}
