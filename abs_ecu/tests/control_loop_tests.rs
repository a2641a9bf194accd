//! End-to-end control loop tests.
//!
//! The loop is driven through fake `CanTransport` / `PwmIo`
//! collaborators: scripted frame sequences go in, emitted status frames
//! and duty writes come out.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use abs_common::config::EcuConfig;
use abs_common::frame::crc8;
use abs_ecu::can::{CanError, CanTransport, RawFrame};
use abs_ecu::core::{EcuCore, EcuError};
use abs_ecu::pwm::{PwmError, PwmIo, PwmSession};

// ─── Fakes ──────────────────────────────────────────────────────────

/// What the transport does once its scripted frames run out.
enum WhenDrained {
    /// Clear the loop's running flag and report a quiet bus.
    ClearFlag(Rc<RefCell<Option<Arc<AtomicBool>>>>),
    /// Fail the receive (fatal path).
    Fail,
}

struct FakeTransport {
    rx: VecDeque<RawFrame>,
    sent: Rc<RefCell<Vec<(u32, Vec<u8>)>>>,
    when_drained: WhenDrained,
}

impl CanTransport for FakeTransport {
    fn receive(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, CanError> {
        if let Some(frame) = self.rx.pop_front() {
            return Ok(Some(frame));
        }
        match &self.when_drained {
            WhenDrained::ClearFlag(slot) => {
                if let Some(flag) = slot.borrow().as_ref() {
                    flag.store(false, Ordering::SeqCst);
                }
                Ok(None)
            }
            WhenDrained::Fail => Err(CanError::Receive(io::Error::from(
                io::ErrorKind::BrokenPipe,
            ))),
        }
    }

    fn send(&mut self, id: u32, payload: &[u8]) -> Result<(), CanError> {
        self.sent.borrow_mut().push((id, payload.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct FakePwmState {
    exists: bool,
    unexports: u32,
    duty_writes: Vec<u64>,
    enable_writes: Vec<bool>,
    fail_enable: bool,
}

#[derive(Clone, Default)]
struct FakePwm(Rc<RefCell<FakePwmState>>);

impl PwmIo for FakePwm {
    fn exists(&self) -> bool {
        self.0.borrow().exists
    }

    fn export(&self) -> Result<(), PwmError> {
        self.0.borrow_mut().exists = true;
        Ok(())
    }

    fn unexport(&self) -> Result<(), PwmError> {
        let mut s = self.0.borrow_mut();
        s.unexports += 1;
        s.exists = false;
        Ok(())
    }

    fn write_period_ns(&self, _period_ns: u64) -> Result<(), PwmError> {
        Ok(())
    }

    fn write_duty_ns(&self, duty_ns: u64) -> Result<(), PwmError> {
        self.0.borrow_mut().duty_writes.push(duty_ns);
        Ok(())
    }

    fn write_enable(&self, enable: bool) -> Result<(), PwmError> {
        let mut s = self.0.borrow_mut();
        if enable && s.fail_enable {
            return Err(PwmError::NotEnabled);
        }
        s.enable_writes.push(enable);
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

const TELEMETRY_ID: u32 = 0x100;
const STATUS_ID: u32 = 0x200;

fn telemetry(distance_mm: u16, counter: u8) -> RawFrame {
    let [hi, lo] = distance_mm.to_be_bytes();
    let mut data = [hi, lo, counter, 0, 0, 0, 0, 0];
    data[7] = crc8(&data[..7]);
    RawFrame {
        id: TELEMETRY_ID,
        extended: false,
        len: 8,
        data,
    }
}

fn corrupted(distance_mm: u16, counter: u8) -> RawFrame {
    let mut frame = telemetry(distance_mm, counter);
    frame.data[7] ^= 0xFF;
    frame
}

struct Harness {
    core: EcuCore<FakeTransport, FakePwm>,
    sent: Rc<RefCell<Vec<(u32, Vec<u8>)>>>,
    pwm: FakePwm,
}

fn harness(frames: Vec<RawFrame>, drained: bool) -> Harness {
    let sent = Rc::new(RefCell::new(Vec::new()));
    let slot = Rc::new(RefCell::new(None));
    let when_drained = if drained {
        WhenDrained::ClearFlag(Rc::clone(&slot))
    } else {
        WhenDrained::Fail
    };
    let transport = FakeTransport {
        rx: frames.into(),
        sent: Rc::clone(&sent),
        when_drained,
    };
    let pwm = FakePwm::default();
    let core = EcuCore::new(
        EcuConfig::default(),
        transport,
        PwmSession::new(pwm.clone()),
    );
    *slot.borrow_mut() = Some(core.running_flag());
    Harness { core, sent, pwm }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[test]
fn brake_sequence_end_to_end() {
    let mut h = harness(
        vec![telemetry(400, 0), telemetry(50, 1), corrupted(150, 2)],
        true,
    );
    h.core.init().unwrap();
    h.core.run().unwrap();

    // Far → off, at min → full, corrupted → fail-safe off.
    assert_eq!(
        *h.sent.borrow(),
        vec![
            (STATUS_ID, vec![0, 0]),
            (STATUS_ID, vec![1, 100]),
            (STATUS_ID, vec![0, 0]),
        ]
    );

    // Last applied duty is the fail-safe zero.
    assert_eq!(*h.pwm.0.borrow().duty_writes.last().unwrap(), 0);

    let stats = h.core.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.integrity_failures, 1);
    assert_eq!(stats.reports_sent, 3);
}

#[test]
fn filter_skips_foreign_traffic() {
    let foreign = RawFrame {
        id: 0x123,
        ..telemetry(150, 0)
    };
    let extended = RawFrame {
        extended: true,
        ..telemetry(150, 1)
    };
    let short = RawFrame {
        len: 4,
        ..telemetry(150, 2)
    };
    let mut h = harness(vec![foreign, extended, short, telemetry(150, 3)], true);
    h.core.init().unwrap();
    h.core.run().unwrap();

    // Only the well-formed frame produced a status report.
    assert_eq!(h.sent.borrow().len(), 1);
    let stats = h.core.stats();
    assert_eq!(stats.frames_ignored, 3);
    assert_eq!(stats.frames_received, 1);
}

#[test]
fn receive_error_terminates_the_loop() {
    let mut h = harness(vec![telemetry(150, 0)], false);
    h.core.init().unwrap();
    let err = h.core.run().unwrap_err();
    assert!(matches!(err, EcuError::Can(CanError::Receive(_))));

    // The frame before the failure was still processed to completion.
    assert_eq!(h.sent.borrow().len(), 1);
}

#[test]
fn corrupted_frames_never_command_braking() {
    // All corrupted, all at threatening distances.
    let frames = (0u8..5).map(|i| corrupted(10, i)).collect();
    let mut h = harness(frames, true);
    h.core.init().unwrap();
    h.core.run().unwrap();

    for (id, payload) in h.sent.borrow().iter() {
        assert_eq!(*id, STATUS_ID);
        assert_eq!(payload, &vec![0, 0]);
    }
    // Configure's reset plus one fail-safe write per frame, all zero.
    assert!(h.pwm.0.borrow().duty_writes.iter().all(|&d| d == 0));
    assert_eq!(h.core.stats().integrity_failures, 5);
}

#[test]
fn degraded_actuator_still_reports_intent() {
    let mut h = harness(vec![telemetry(50, 0)], true);
    h.pwm.0.borrow_mut().fail_enable = true;
    h.core.init().unwrap(); // enable failure is non-fatal
    h.core.run().unwrap();

    // Command was computed and reported even though no duty write
    // reached the hardware.
    assert_eq!(*h.sent.borrow(), vec![(STATUS_ID, vec![1, 100])]);
    assert_eq!(h.core.stats().actuator_failures, 1);
    assert_eq!(h.pwm.0.borrow().duty_writes, vec![0]); // configure only
}

#[test]
fn shutdown_is_idempotent() {
    let mut h = harness(vec![], true);
    h.core.init().unwrap();
    h.core.run().unwrap();

    h.core.shutdown();
    h.core.shutdown();
    assert_eq!(h.pwm.0.borrow().unexports, 1);

    // The output stage was switched off during teardown.
    assert_eq!(*h.pwm.0.borrow().enable_writes.last().unwrap(), false);
}
