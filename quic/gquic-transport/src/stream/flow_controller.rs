// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use gquic_core::{
    frame::{Blocked, WindowUpdate},
    stream::StreamId,
    time::{Duration, Timestamp},
    transport,
};

/// Flow control state for one entity: a stream, or (with stream id 0)
/// the connection as a whole.
///
/// Send side: `bytes_sent` may never pass `send_window_offset`; the
/// entity is send-blocked exactly when they are equal. Receive side:
/// the peer may never pass `receive_window_offset`; the window slides
/// as the application consumes bytes, and doubles (up to a cap) when
/// updates are being emitted faster than the round trip time suggests
/// they should be.
#[derive(Debug)]
pub struct FlowController {
    stream_id: StreamId,

    bytes_sent: u64,
    send_window_offset: u64,
    /// The send offset when the last BLOCKED frame left; cleared when
    /// the window moves
    blocked_sent_at: Option<u64>,

    bytes_consumed: u64,
    highest_received: u64,
    receive_window_offset: u64,
    receive_window_size: u64,
    max_receive_window_size: u64,
    last_window_update: Option<Timestamp>,
}

impl FlowController {
    pub fn new(
        stream_id: StreamId,
        send_window_offset: u64,
        receive_window_size: u64,
        max_receive_window_size: u64,
    ) -> Self {
        debug_assert!(receive_window_size <= max_receive_window_size);
        Self {
            stream_id,
            bytes_sent: 0,
            send_window_offset,
            blocked_sent_at: None,
            bytes_consumed: 0,
            highest_received: 0,
            receive_window_offset: receive_window_size,
            receive_window_size,
            max_receive_window_size,
            last_window_update: None,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    #[inline]
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    #[inline]
    pub fn send_window_offset(&self) -> u64 {
        self.send_window_offset
    }

    #[inline]
    pub fn receive_window_offset(&self) -> u64 {
        self.receive_window_offset
    }

    /// Bytes that may still be sent before blocking
    #[inline]
    pub fn available_send_window(&self) -> u64 {
        self.send_window_offset - self.bytes_sent
    }

    #[inline]
    pub fn is_send_blocked(&self) -> bool {
        self.bytes_sent == self.send_window_offset
    }

    /// Accounts for `bytes` leaving toward the peer
    pub fn on_bytes_sent(&mut self, bytes: u64) -> Result<(), transport::Error> {
        if bytes > self.available_send_window() {
            return Err(transport::Error::FLOW_CONTROL_SENT_TOO_MUCH_DATA);
        }
        self.bytes_sent += bytes;
        Ok(())
    }

    /// The peer raised our send window
    pub fn on_window_update(&mut self, byte_offset: u64) {
        if byte_offset > self.send_window_offset {
            self.send_window_offset = byte_offset;
            self.blocked_sent_at = None;
        }
    }

    /// Emits a BLOCKED frame the first time the current window edge
    /// gates a send; repeats only after the window advances
    pub fn maybe_send_blocked(&mut self) -> Option<Blocked> {
        if !self.is_send_blocked() {
            return None;
        }
        if self.blocked_sent_at == Some(self.send_window_offset) {
            return None;
        }
        self.blocked_sent_at = Some(self.send_window_offset);
        Some(Blocked {
            stream_id: self.stream_id,
        })
    }

    /// Validates that the peer stayed within our advertised window.
    /// `highest_offset` is the end offset of the newly received data.
    pub fn on_bytes_received(&mut self, highest_offset: u64) -> Result<(), transport::Error> {
        if highest_offset > self.receive_window_offset {
            return Err(transport::Error::FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA);
        }
        self.highest_received = self.highest_received.max(highest_offset);
        Ok(())
    }

    /// Accounts for the application consuming `bytes` and emits a
    /// WINDOW_UPDATE once half the window is consumed.
    ///
    /// Two updates within two smoothed RTTs mean the window, not the
    /// application, is the bottleneck; it doubles up to the configured
    /// cap before the new offset is advertised.
    pub fn on_bytes_consumed(
        &mut self,
        bytes: u64,
        now: Timestamp,
        smoothed_rtt: Duration,
    ) -> Option<WindowUpdate> {
        self.bytes_consumed += bytes;

        let available = self.receive_window_offset - self.bytes_consumed;
        if available >= self.receive_window_size / 2 {
            return None;
        }

        if let Some(last) = self.last_window_update {
            if now.saturating_duration_since(last) < 2 * smoothed_rtt {
                self.receive_window_size =
                    (self.receive_window_size * 2).min(self.max_receive_window_size);
            }
        }
        self.last_window_update = Some(now);

        self.receive_window_offset = self.bytes_consumed + self.receive_window_size;
        Some(WindowUpdate {
            stream_id: self.stream_id,
            byte_offset: self.receive_window_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::time::{Clock, NoopClock};

    const MS: Duration = Duration::from_millis(1);

    fn controller() -> FlowController {
        FlowController::new(StreamId::new(5), 1000, 1000, 4000)
    }

    #[test]
    fn send_window_enforcement() {
        let mut flow = controller();
        assert_eq!(flow.available_send_window(), 1000);

        flow.on_bytes_sent(600).unwrap();
        assert!(!flow.is_send_blocked());

        flow.on_bytes_sent(400).unwrap();
        assert!(flow.is_send_blocked());

        assert_eq!(
            flow.on_bytes_sent(1).unwrap_err().code,
            transport::Error::FLOW_CONTROL_SENT_TOO_MUCH_DATA.code
        );
    }

    #[test]
    fn blocked_frame_is_sent_once_per_window() {
        let mut flow = controller();
        assert!(flow.maybe_send_blocked().is_none(), "not blocked yet");

        flow.on_bytes_sent(1000).unwrap();
        assert!(flow.maybe_send_blocked().is_some());
        assert!(flow.maybe_send_blocked().is_none(), "already reported");

        // stale update: window edge unchanged, still quiet
        flow.on_window_update(900);
        assert!(flow.maybe_send_blocked().is_none());

        // a real update re-arms the report
        flow.on_window_update(2000);
        assert!(flow.maybe_send_blocked().is_none(), "no longer blocked");
        flow.on_bytes_sent(1000).unwrap();
        assert!(flow.maybe_send_blocked().is_some());
    }

    #[test]
    fn receive_window_enforcement() {
        let mut flow = controller();
        flow.on_bytes_received(1000).unwrap();
        assert_eq!(
            flow.on_bytes_received(1001).unwrap_err().code,
            transport::Error::FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA.code
        );
    }

    #[test]
    fn window_update_at_half_consumed() {
        let mut flow = controller();
        let now = NoopClock.get_time();
        let srtt = 100 * MS;

        assert!(flow.on_bytes_consumed(400, now, srtt).is_none());

        // crossing the half-window mark advertises a new offset
        let update = flow.on_bytes_consumed(200, now, srtt).unwrap();
        assert_eq!(update.stream_id, StreamId::new(5));
        assert_eq!(update.byte_offset, 600 + 1000);
    }

    #[test]
    fn rapid_updates_double_the_window() {
        let mut flow = controller();
        let mut now = NoopClock.get_time();
        let srtt = 100 * MS;

        let first = flow.on_bytes_consumed(600, now, srtt).unwrap();
        assert_eq!(first.byte_offset, 600 + 1000);

        // a second update well within 2 * srtt doubles the window
        now += 50 * MS;
        let second = flow.on_bytes_consumed(600, now, srtt).unwrap();
        assert_eq!(second.byte_offset, 1200 + 2000);

        // growth stops at the cap
        now += 50 * MS;
        let third = flow.on_bytes_consumed(1500, now, srtt).unwrap();
        assert_eq!(third.byte_offset, 2700 + 4000);
        now += 50 * MS;
        let fourth = flow.on_bytes_consumed(3000, now, srtt).unwrap();
        assert_eq!(fourth.byte_offset, 5700 + 4000);
    }

    #[test]
    fn slow_updates_keep_the_window_size() {
        let mut flow = controller();
        let mut now = NoopClock.get_time();
        let srtt = 100 * MS;

        flow.on_bytes_consumed(600, now, srtt).unwrap();

        now += 300 * MS;
        let update = flow.on_bytes_consumed(600, now, srtt).unwrap();
        assert_eq!(update.byte_offset, 1200 + 1000);
    }
}
