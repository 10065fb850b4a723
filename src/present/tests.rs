//! Presenter state machine tests against the headless device.

use super::headless::DeviceEvent;
use super::*;
use proptest::prelude::*;
use std::sync::atomic::Ordering;
use tiny_skia::Color as SkColor;

fn frame(w: u32, h: u32, r: u8, g: u8, b: u8) -> Pixmap {
    let mut p = Pixmap::new(w, h).unwrap();
    p.fill(SkColor::from_rgba8(r, g, b, 255));
    p
}

fn quick_options(buffers: usize) -> PresentOptions {
    PresentOptions {
        buffers,
        flip_timeout: Duration::ZERO,
        flip_timeout_cycles: 2,
    }
}

fn presenter(buffers: usize) -> Presenter<HeadlessDevice> {
    let mut p = Presenter::new(HeadlessDevice::new(8, 4).unwrap(), quick_options(buffers));
    p.configure().unwrap();
    p
}

/// Replays a device trace and reports the first write into a buffer the
/// display could still be reading.
fn first_unsafe_write(trace: &[DeviceEvent]) -> Option<usize> {
    let mut fbs = std::collections::HashMap::new();
    let mut scanned = None;
    let mut pending = None;
    for (i, event) in trace.iter().enumerate() {
        match *event {
            DeviceEvent::Register { fb, buffer } => {
                fbs.insert(fb, buffer);
            }
            DeviceEvent::SetCrtc { fb } => scanned = fbs.get(&fb).copied(),
            DeviceEvent::Flip { fb } => pending = fbs.get(&fb).copied(),
            DeviceEvent::FlipComplete { .. } => scanned = pending.take(),
            DeviceEvent::Write { buffer } => {
                if Some(buffer) == scanned || Some(buffer) == pending {
                    return Some(i);
                }
            }
            DeviceEvent::Release { .. } => {}
            DeviceEvent::Restore => {
                scanned = None;
                pending = None;
            }
        }
    }
    None
}

#[test]
fn present_requires_configuration() {
    let running = AtomicBool::new(true);
    let mut p = Presenter::new(HeadlessDevice::new(8, 4).unwrap(), quick_options(2));
    assert_eq!(p.state(), PresentState::Uninitialized);
    assert!(matches!(
        p.present(&frame(8, 4, 0, 0, 0), &running),
        Err(PresentError::NotConfigured("uninitialized"))
    ));
}

#[test]
fn first_frame_is_mode_set_then_flips() {
    let running = AtomicBool::new(true);
    let mut p = presenter(2);
    assert_eq!(p.state(), PresentState::Configured);

    assert_eq!(
        p.present(&frame(8, 4, 255, 0, 0), &running).unwrap(),
        Presented::ModeSet
    );
    assert_eq!(p.state(), PresentState::Stable);
    assert_eq!(p.device().scanout_pixel(3, 2), Some([255, 0, 0]));

    assert_eq!(
        p.present(&frame(8, 4, 0, 255, 0), &running).unwrap(),
        Presented::Flipped
    );
    assert_eq!(p.device().scanout_pixel(3, 2), Some([0, 255, 0]));
    assert_eq!(p.frames_presented(), 2);
    assert!(!p.flip_pending());
}

#[test]
fn framebuffers_are_registered_once_per_slot() {
    let running = AtomicBool::new(true);
    let mut p = presenter(2);
    for i in 0..6u8 {
        p.present(&frame(8, 4, i, i, i), &running).unwrap();
    }
    let registrations = p
        .device()
        .trace()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Register { .. }))
        .count();
    assert_eq!(registrations, 2);
}

#[test]
fn rejects_wrong_frame_size() {
    let running = AtomicBool::new(true);
    let mut p = presenter(2);
    assert!(matches!(
        p.present(&frame(4, 4, 0, 0, 0), &running),
        Err(PresentError::FrameSize {
            got: (4, 4),
            expected: (8, 4)
        })
    ));
    // Nothing was claimed for the bad frame.
    p.present(&frame(8, 4, 0, 0, 0), &running).unwrap();
    p.present(&frame(8, 4, 0, 0, 0), &running).unwrap();
}

#[test]
fn timed_out_flip_stays_pending_until_completion() {
    let running = AtomicBool::new(true);
    let mut p = presenter(2);
    p.present(&frame(8, 4, 255, 0, 0), &running).unwrap();

    p.device_mut().hold_flips(true);
    assert!(matches!(
        p.present(&frame(8, 4, 0, 0, 255), &running),
        Err(PresentError::FlipTimeout { attempts: 2 })
    ));
    assert!(p.flip_pending());
    assert_eq!(p.state(), PresentState::Flip);
    // Old frame is still what the display shows.
    assert_eq!(p.device().scanout_pixel(0, 0), Some([255, 0, 0]));
    assert!(matches!(
        p.present(&frame(8, 4, 0, 0, 0), &running),
        Err(PresentError::FlipPending)
    ));
    assert!(matches!(
        p.wait_for_flip(&running),
        Err(PresentError::FlipTimeout { .. })
    ));

    p.device_mut().release_held_flip().unwrap();
    assert!(p.dispatch_events().unwrap());
    assert!(!p.flip_pending());
    assert_eq!(p.state(), PresentState::Stable);
    assert_eq!(p.device().scanout_pixel(0, 0), Some([0, 0, 255]));
}

#[test]
fn cancelled_wait_reports_cancellation() {
    let running = AtomicBool::new(true);
    let mut p = presenter(2);
    p.present(&frame(8, 4, 1, 2, 3), &running).unwrap();
    p.device_mut().hold_flips(true);
    running.store(false, Ordering::SeqCst);
    assert!(matches!(
        p.present(&frame(8, 4, 1, 2, 3), &running),
        Err(PresentError::Cancelled)
    ));
}

#[test]
fn shutdown_restores_and_releases_everything() {
    let running = AtomicBool::new(true);
    let mut p = presenter(3);
    p.present(&frame(8, 4, 9, 9, 9), &running).unwrap();
    p.present(&frame(8, 4, 9, 9, 9), &running).unwrap();

    p.shutdown().unwrap();
    assert_eq!(p.state(), PresentState::Shutdown);
    assert_eq!(p.device().live_buffers(), 0);
    let trace = p.device().trace();
    let restore_at = trace.iter().position(|e| *e == DeviceEvent::Restore).unwrap();
    assert!(trace[restore_at..]
        .iter()
        .skip(1)
        .all(|e| matches!(e, DeviceEvent::Release { .. })));

    // Idempotent, and presenting afterwards is refused.
    p.shutdown().unwrap();
    assert!(matches!(
        p.present(&frame(8, 4, 0, 0, 0), &running),
        Err(PresentError::NotConfigured("shutdown"))
    ));
}

#[test]
fn failed_configure_releases_partial_chain() {
    let mut device = HeadlessDevice::new(8, 4).unwrap();
    device.limit_buffers(2);
    let mut p = Presenter::new(device, quick_options(3));

    assert!(matches!(p.configure(), Err(PresentError::Device { op: "allocate", .. })));
    assert_eq!(p.state(), PresentState::Uninitialized);
    assert_eq!(p.device().live_buffers(), 0);
    let released = p
        .device()
        .trace()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Release { .. }))
        .count();
    assert_eq!(released, 2);
}

#[test]
fn xrgb_copy_respects_pitch() {
    let src = frame(2, 2, 0x11, 0x22, 0x33);
    let pitch = 12;
    let mut dst = vec![0u8; pitch * 2];
    copy_frame_xrgb(&src, &mut dst, pitch);
    assert_eq!(&dst[0..4], &[0x33, 0x22, 0x11, 0xff]);
    assert_eq!(&dst[8..12], &[0, 0, 0, 0]);
    assert_eq!(&dst[12..16], &[0x33, 0x22, 0x11, 0xff]);
}

#[derive(Debug, Clone)]
enum Step {
    Present,
    Hold(bool),
    Release,
    Dispatch,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Present),
        1 => any::<bool>().prop_map(Step::Hold),
        1 => Just(Step::Release),
        1 => Just(Step::Dispatch),
    ]
}

proptest! {
    /// A buffer is never rewritten while it is on screen or in flight,
    /// whatever the interleaving of timeouts and late completions.
    #[test]
    fn buffer_release_ordering(buffers in 2usize..5, steps in prop::collection::vec(step(), 1..40)) {
        let running = AtomicBool::new(true);
        let mut p = presenter(buffers);
        for (n, s) in steps.into_iter().enumerate() {
            match s {
                Step::Present => {
                    let shade = (n * 7 % 256) as u8;
                    let _ = p.present(&frame(8, 4, shade, shade, shade), &running);
                }
                Step::Hold(hold) => p.device_mut().hold_flips(hold),
                Step::Release => p.device_mut().release_held_flip().unwrap(),
                Step::Dispatch => {
                    p.dispatch_events().unwrap();
                }
            }
            let on_screen = (0..p.swap_chain().len())
                .filter(|&i| p.swap_chain().state(i) == SlotState::OnScreen)
                .count();
            prop_assert!(on_screen <= 1);
        }
        prop_assert_eq!(first_unsafe_write(p.device().trace()), None);
    }
}
