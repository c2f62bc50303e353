//! The half-duplex polling loop.
//!
//! Every tick recomputes the current transmit slot and runs exactly one of
//! the two paths: inside this node's slot, a single send attempt from
//! buffered console input (at most once per slot occupancy); outside it, a
//! receive poll. All radio and console errors are logged and the loop
//! continues; the only blocking point is waiting for transmit completion.

use log::{info, warn};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::console::Console;
use crate::radio::{EdgeMonitor, RadioTransport};
use crate::schedule;
use crate::shutdown::ShutdownFlag;

/// Where this node stands relative to the current slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Another node owns the slot; we listen.
    IdleSlot,
    /// Our slot, nothing transmitted yet this occupancy.
    OwnSlotPending,
    /// Our slot, already transmitted; idle until the slot changes.
    OwnSlotSent,
}

/// Composition of radio, optional edge monitor and console into the
/// time-division link state machine.
pub struct DuplexLink<R: RadioTransport, E: EdgeMonitor, C: Console> {
    radio: R,
    edge: Option<E>,
    console: C,
    node_id: u8,
    node_count: u8,
    max_message_len: usize,
    state: SlotState,
}

impl<R: RadioTransport, E: EdgeMonitor, C: Console> DuplexLink<R, E, C> {
    pub fn new(radio: R, edge: Option<E>, console: C, node_id: u8, node_count: u8) -> Self {
        let max_message_len = radio.max_message_len();
        Self {
            radio,
            edge,
            console,
            node_id,
            node_count,
            max_message_len,
            state: SlotState::IdleSlot,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// One cycle of the cooperative loop at wall-clock time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        let slot = schedule::slot_for(now_ms, self.node_count);

        if slot != self.node_id {
            self.state = SlotState::IdleSlot;
            self.poll_receive();
            return;
        }

        if self.state == SlotState::OwnSlotSent {
            // Already used this occupancy; idle until the slot rotates.
            return;
        }

        self.state = SlotState::OwnSlotPending;
        self.try_send_from_console();
    }

    /// Own-slot path: switch to transmit, attempt one console read, send
    /// if anything was typed, then return to listening.
    fn try_send_from_console(&mut self) {
        if let Err(err) = self.radio.set_mode_tx() {
            warn!("failed to enter tx mode: {err}");
        }

        if let Some(line) = self.console.try_read_line(self.max_message_len) {
            if !line.is_empty() {
                self.send(&line);
                self.state = SlotState::OwnSlotSent;
            }
        }

        if let Err(err) = self.radio.set_mode_rx() {
            warn!("failed to return to rx mode: {err}");
        }
    }

    /// Enqueue and confirm one packet. Both outcomes are surfaced
    /// independently; neither is retried.
    fn send(&mut self, payload: &[u8]) {
        self.console.display_sent(payload);

        match self.radio.send(payload) {
            Ok(()) => self.console.display_status("QUEUED"),
            Err(err) => {
                warn!("send enqueue failed: {err}");
                self.console.display_status("ERR");
                return;
            }
        }

        match self.radio.wait_packet_sent() {
            Ok(()) => self.console.display_status("SENT"),
            Err(err) => {
                warn!("transmit confirmation failed: {err}");
                self.console.display_status("ERR");
            }
        }
    }

    /// Foreign-slot path: check the edge flag first when an interrupt line
    /// is wired, then pull at most one packet out of the radio.
    fn poll_receive(&mut self) {
        if let Some(monitor) = self.edge.as_mut()
            && !monitor.check_and_clear()
        {
            return;
        }

        match self.radio.available() {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!("receive availability check failed: {err}");
                return;
            }
        }

        match self.radio.recv() {
            Ok(Some(packet)) => {
                self.console
                    .display_received(packet.from, packet.to, packet.rssi, &packet.payload);
            }
            Ok(None) => self.console.display_status("RECV FAILED"),
            Err(err) => {
                warn!("receive failed: {err}");
                self.console.display_status("RECV FAILED");
            }
        }
    }

    /// Orderly shutdown: put the radio to sleep. Called exactly once after
    /// the loop exits.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.radio.sleep() {
            warn!("failed to put radio to sleep: {err}");
        }
        info!("link shut down");
    }
}

fn wall_clock_ms() -> u64 {
    // Saturate on a pre-epoch clock rather than panic.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Drives the link until the shutdown token is observed, then shuts the
/// radio down. The token is checked once per tick boundary, so cancellation
/// latency is bounded by one tick plus at most one transmit confirmation.
pub fn run<R: RadioTransport, E: EdgeMonitor, C: Console>(
    link: &mut DuplexLink<R, E, C>,
    shutdown: ShutdownFlag,
    tick_interval: Duration,
) {
    while !shutdown.is_set() {
        link.tick(wall_clock_ms());
        thread::sleep(tick_interval);
    }
    info!("shutdown requested, exiting loop");
    link.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{RadioError, ReceivedPacket};

    #[derive(Default)]
    struct MockRadio {
        rx_queue: Vec<ReceivedPacket>,
        sent: Vec<Vec<u8>>,
        available_calls: usize,
        sleep_calls: usize,
        fail_enqueue: bool,
        fail_confirm: bool,
        confirm_calls: usize,
    }

    impl RadioTransport for MockRadio {
        fn init(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_frequency(&mut self, _mhz: f64) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_tx_power(&mut self, _dbm: i8, _use_rfo: bool) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_node_address(&mut self, _address: u8) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_header_from(&mut self, _from: u8) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_promiscuous(&mut self, _promiscuous: bool) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_mode_tx(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_mode_rx(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn available(&mut self) -> Result<bool, RadioError> {
            self.available_calls += 1;
            Ok(!self.rx_queue.is_empty())
        }
        fn recv(&mut self) -> Result<Option<ReceivedPacket>, RadioError> {
            Ok(if self.rx_queue.is_empty() {
                None
            } else {
                Some(self.rx_queue.remove(0))
            })
        }
        fn send(&mut self, payload: &[u8]) -> Result<(), RadioError> {
            if self.fail_enqueue {
                return Err(RadioError::PayloadTooLong(payload.len()));
            }
            self.sent.push(payload.to_vec());
            Ok(())
        }
        fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
            self.confirm_calls += 1;
            if self.fail_confirm {
                Err(RadioError::TxTimeout)
            } else {
                Ok(())
            }
        }
        fn sleep(&mut self) -> Result<(), RadioError> {
            self.sleep_calls += 1;
            Ok(())
        }
        fn max_message_len(&self) -> usize {
            251
        }
    }

    struct MockEdge {
        fire: bool,
        polls: usize,
    }

    impl EdgeMonitor for MockEdge {
        fn check_and_clear(&mut self) -> bool {
            self.polls += 1;
            self.fire
        }
    }

    /// Edge monitor type for links built without one.
    struct NoEdge;

    impl EdgeMonitor for NoEdge {
        fn check_and_clear(&mut self) -> bool {
            unreachable!("link has no edge monitor")
        }
    }

    #[derive(Default)]
    struct MockConsole {
        lines: Vec<Vec<u8>>,
        received: Vec<(u8, u8, i16, Vec<u8>)>,
        statuses: Vec<String>,
        read_max_lens: Vec<usize>,
    }

    impl Console for MockConsole {
        fn try_read_line(&mut self, max_len: usize) -> Option<Vec<u8>> {
            self.read_max_lens.push(max_len);
            if self.lines.is_empty() {
                None
            } else {
                let mut line = self.lines.remove(0);
                line.truncate(max_len);
                Some(line)
            }
        }
        fn display_received(&mut self, from: u8, to: u8, rssi: i16, payload: &[u8]) {
            self.received.push((from, to, rssi, payload.to_vec()));
        }
        fn display_sent(&mut self, _payload: &[u8]) {}
        fn display_status(&mut self, tag: &str) {
            self.statuses.push(tag.to_string());
        }
    }

    fn link_with(
        radio: MockRadio,
        console: MockConsole,
        node_id: u8,
        node_count: u8,
    ) -> DuplexLink<MockRadio, NoEdge, MockConsole> {
        DuplexLink::new(radio, None, console, node_id, node_count)
    }

    #[test]
    fn sends_at_most_once_per_slot_occupancy() {
        let console = MockConsole {
            // A line is waiting on every read
            lines: vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()],
            ..Default::default()
        };
        let mut link = link_with(MockRadio::default(), console, 0, 2);

        // Slot sequence [0,0,0,1,1,0] as seconds: sends on the first tick
        // of each own-slot run only.
        for now_ms in [0, 200, 400, 1000, 1200, 2000] {
            link.tick(now_ms);
        }

        assert_eq!(link.radio.sent, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn does_not_send_outside_own_slot() {
        let console = MockConsole {
            lines: vec![b"pending".to_vec()],
            ..Default::default()
        };
        let mut link = link_with(MockRadio::default(), console, 1, 2);

        // Slot 0 the whole time; node 1 must only listen.
        for now_ms in (0..1000).step_by(100) {
            link.tick(now_ms);
        }

        assert!(link.radio.sent.is_empty());
        assert_eq!(link.state(), SlotState::IdleSlot);
        assert!(link.radio.available_calls > 0);
    }

    #[test]
    fn empty_console_leaves_slot_pending_for_retry() {
        let mut link = link_with(MockRadio::default(), MockConsole::default(), 0, 2);

        link.tick(0);
        assert_eq!(link.state(), SlotState::OwnSlotPending);

        // Input shows up later in the same slot occupancy
        link.console.lines.push(b"late".to_vec());
        link.tick(500);
        assert_eq!(link.state(), SlotState::OwnSlotSent);
        assert_eq!(link.radio.sent.len(), 1);
    }

    #[test]
    fn received_packet_is_displayed_once_with_its_metadata() {
        let radio = MockRadio {
            rx_queue: vec![ReceivedPacket {
                from: 2,
                to: 0,
                id: 0,
                flags: 0,
                rssi: -40,
                payload: vec![0x48, 0x69],
            }],
            ..Default::default()
        };
        let mut link = link_with(radio, MockConsole::default(), 0, 2);

        // Node 0 in slot 1: receive path runs
        link.tick(1000);
        link.tick(1100);

        assert_eq!(link.console.received, vec![(2, 0, -40, vec![0x48, 0x69])]);
        assert!(link.radio.sent.is_empty());
    }

    #[test]
    fn silent_edge_monitor_suppresses_transport_queries() {
        let edge = MockEdge {
            fire: false,
            polls: 0,
        };
        let mut link = DuplexLink::new(
            MockRadio::default(),
            Some(edge),
            MockConsole::default(),
            0,
            2,
        );

        for i in 0..100 {
            link.tick(1000 + i);
        }

        assert_eq!(link.radio.available_calls, 0);
        assert_eq!(link.edge.as_ref().unwrap().polls, 100);
    }

    #[test]
    fn firing_edge_monitor_lets_the_receive_through() {
        let radio = MockRadio {
            rx_queue: vec![ReceivedPacket {
                from: 1,
                to: 0,
                id: 0,
                flags: 0,
                rssi: -80,
                payload: vec![1],
            }],
            ..Default::default()
        };
        let edge = MockEdge {
            fire: true,
            polls: 0,
        };
        let mut link = DuplexLink::new(radio, Some(edge), MockConsole::default(), 0, 2);

        link.tick(1000);

        assert_eq!(link.radio.available_calls, 1);
        assert_eq!(link.console.received.len(), 1);
    }

    #[test]
    fn console_reads_are_bounded_by_the_transport_maximum() {
        let console = MockConsole {
            lines: vec![vec![b'x'; 1000]],
            ..Default::default()
        };
        let mut link = link_with(MockRadio::default(), console, 0, 1);

        link.tick(0);

        assert_eq!(link.console.read_max_lens, vec![251]);
        assert_eq!(link.radio.sent[0].len(), 251);
    }

    #[test]
    fn enqueue_failure_reports_err_and_skips_confirmation() {
        let radio = MockRadio {
            fail_enqueue: true,
            ..Default::default()
        };
        let console = MockConsole {
            lines: vec![b"doomed".to_vec()],
            ..Default::default()
        };
        let mut link = link_with(radio, console, 0, 2);

        link.tick(0);

        assert_eq!(link.console.statuses, vec!["ERR"]);
        assert_eq!(link.radio.confirm_calls, 0);
        // The attempt still counts against this slot occupancy
        assert_eq!(link.state(), SlotState::OwnSlotSent);
    }

    #[test]
    fn confirmation_failure_reports_both_outcomes() {
        let radio = MockRadio {
            fail_confirm: true,
            ..Default::default()
        };
        let console = MockConsole {
            lines: vec![b"half".to_vec()],
            ..Default::default()
        };
        let mut link = link_with(radio, console, 0, 2);

        link.tick(0);

        assert_eq!(link.console.statuses, vec!["QUEUED", "ERR"]);
    }

    #[test]
    fn preset_shutdown_exits_immediately_and_sleeps_radio_once() {
        let mut link = link_with(MockRadio::default(), MockConsole::default(), 0, 2);
        let flag = ShutdownFlag::manual();
        flag.set();

        run(&mut link, flag, Duration::from_millis(1));

        assert_eq!(link.radio.sleep_calls, 1);
        assert!(link.radio.sent.is_empty());
        assert_eq!(link.radio.available_calls, 0);
    }
}
