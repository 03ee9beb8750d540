//! End-to-end audio behavior of a conference.
//!
//! Members write blocks in their own formats and read the mix in theirs:
//! - Listeners hear every other contributor, resampled to their format
//! - Nobody hears themselves
//! - Per-source read cursors only move forward
//! - A listener that falls a whole buffer behind resynchronizes

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use mcu_bridge::errors::BridgeError;
use mcu_bridge::member::{ConferenceMember, MUTE_OUTGOING_AUDIO};
use mcu_test_utils::{
    bridge_member, constant_block, is_silent, packet_frames, peak, recorder_member, sine,
    wideband_stereo, RecordingObserver, TestManager, NARROWBAND,
};

// ============================================================================
// Mixing and resampling
// ============================================================================

#[test]
fn test_tone_reaches_wideband_listener_and_not_the_speaker() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room1", "Room 1").unwrap();

    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let wide = wideband_stereo();
    let tone = constant_block(NARROWBAND, packet_frames(NARROWBAND), 1000);

    // B hears the tone at 16 kHz stereo once the converter has settled.
    let mut heard = vec![0i16; wide.samples_in(packet_frames(wide))];
    for _ in 0..4 {
        assert!(a.write_audio(&tone, NARROWBAND));
        assert!(b.read_audio(&mut heard, wide));
    }
    assert!(heard.iter().all(|&s| (i32::from(s) - 1000).abs() <= 1), "B should hear A's tone");

    // A hears nothing: B has said nothing and A never hears itself.
    let mut own = vec![0i16; packet_frames(NARROWBAND)];
    assert!(a.read_audio(&mut own, NARROWBAND));
    assert!(is_silent(&own));

    // Once C speaks, A hears C.
    let c = bridge_member("C");
    conf.add_member(c.clone()).unwrap();
    assert!(c.write_audio(&constant_block(NARROWBAND, packet_frames(NARROWBAND), 500), NARROWBAND));
    assert!(a.read_audio(&mut own, NARROWBAND));
    assert!(own.iter().all(|&s| s == 500));
}

#[test]
fn test_sine_keeps_amplitude_through_resampling() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room2", "Room 2").unwrap();
    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let wide = wideband_stereo();
    let frames = packet_frames(NARROWBAND);
    let mut written = 0u64;
    let mut heard_peak = 0u16;
    for _ in 0..5 {
        a.write_audio(&sine(NARROWBAND, frames, 400.0, 8000, written), NARROWBAND);
        written += frames as u64;
        let mut out = vec![0i16; wide.samples_in(packet_frames(wide))];
        b.read_audio(&mut out, wide);
        heard_peak = heard_peak.max(peak(&out));
    }
    // Cubic interpolation may overshoot the written peak slightly.
    assert!(heard_peak > 7500 && heard_peak <= 8100, "peak {heard_peak}");
}

#[test]
fn test_no_self_echo_with_two_speakers() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room3", "Room 3").unwrap();
    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let frames = packet_frames(NARROWBAND);
    for _ in 0..3 {
        a.write_audio(&constant_block(NARROWBAND, frames, 1000), NARROWBAND);
        b.write_audio(&constant_block(NARROWBAND, frames, 300), NARROWBAND);

        let mut heard_by_a = vec![0i16; frames];
        let mut heard_by_b = vec![0i16; frames];
        a.read_audio(&mut heard_by_a, NARROWBAND);
        b.read_audio(&mut heard_by_b, NARROWBAND);
        assert!(heard_by_a.iter().all(|&s| s == 300));
        assert!(heard_by_b.iter().all(|&s| s == 1000));
    }
}

#[test]
fn test_mix_saturates() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room4", "Room 4").unwrap();
    let loud_a = bridge_member("Loud A");
    let loud_b = bridge_member("Loud B");
    let listener = bridge_member("Listener");
    for member in [&loud_a, &loud_b, &listener] {
        conf.add_member(member.clone()).unwrap();
    }

    let frames = packet_frames(NARROWBAND);
    loud_a.write_audio(&constant_block(NARROWBAND, frames, 30_000), NARROWBAND);
    loud_b.write_audio(&constant_block(NARROWBAND, frames, 30_000), NARROWBAND);
    let mut out = vec![0i16; frames];
    listener.read_audio(&mut out, NARROWBAND);
    assert!(out.iter().all(|&s| s == i16::MAX));

    loud_a.write_audio(&constant_block(NARROWBAND, frames, -30_000), NARROWBAND);
    loud_b.write_audio(&constant_block(NARROWBAND, frames, -30_000), NARROWBAND);
    listener.read_audio(&mut out, NARROWBAND);
    assert!(out.iter().all(|&s| s == i16::MIN));
}

#[test]
fn test_recorder_hears_everyone_but_is_never_heard() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room5", "Room 5").unwrap();
    let a = bridge_member("A");
    let rec = recorder_member("Recorder");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(rec.clone()).unwrap();

    let frames = packet_frames(NARROWBAND);
    a.write_audio(&constant_block(NARROWBAND, frames, 700), NARROWBAND);
    assert!(!rec.write_audio(&constant_block(NARROWBAND, frames, 900), NARROWBAND));

    let mut recorded = vec![0i16; frames];
    rec.read_audio(&mut recorded, NARROWBAND);
    assert!(recorded.iter().all(|&s| s == 700));

    let mut heard_by_a = vec![0i16; frames];
    a.read_audio(&mut heard_by_a, NARROWBAND);
    assert!(is_silent(&heard_by_a));
}

// ============================================================================
// Reader cursors
// ============================================================================

#[test]
fn test_reader_cursor_is_monotonic() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room6", "Room 6").unwrap();
    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let wide = wideband_stereo();
    let frames = packet_frames(NARROWBAND);
    let mut last = 0u64;
    for round in 0..10 {
        // Irregular writes: sometimes two packets, sometimes none.
        for _ in 0..(round % 3) {
            a.write_audio(&constant_block(NARROWBAND, frames, 100), NARROWBAND);
        }
        let mut out = vec![0i16; wide.samples_in(packet_frames(wide))];
        b.read_audio(&mut out, wide);
        if let Some(position) = b.core().reader_position(a.id()) {
            assert!(position >= last, "cursor moved back: {position} < {last}");
            last = position;
        }
    }
    assert!(last > 0);
    // One converter for A's format, shared by every read.
    assert_eq!(b.core().resampler_count(), 1);
}

#[test]
fn test_lagging_listener_resyncs_to_recent_audio() {
    let manager = TestManager::new().with_audio_buffer_ms(100).build();
    let conf = manager.make_conference("room7", "Room 7").unwrap();
    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let frames = packet_frames(NARROWBAND);
    a.write_audio(&constant_block(NARROWBAND, frames, 1), NARROWBAND);
    let mut out = vec![0i16; frames];
    b.read_audio(&mut out, NARROWBAND);
    assert_eq!(b.core().reader_position(a.id()), Some(frames as u64));

    // A talks for far longer than the 100 ms buffer while B is stalled.
    for value in 2..=21 {
        a.write_audio(&constant_block(NARROWBAND, frames, value), NARROWBAND);
    }
    b.read_audio(&mut out, NARROWBAND);

    // B skips to the latest packet instead of replaying overwritten audio.
    assert!(out.iter().all(|&s| s == 21));
    assert_eq!(b.core().reader_position(a.id()), Some(21 * frames as u64));
}

// ============================================================================
// Member settings on the media path
// ============================================================================

#[test]
fn test_output_gain_and_mute() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room8", "Room 8").unwrap();
    let a = bridge_member("A");
    let b = bridge_member("B");
    conf.add_member(a.clone()).unwrap();
    conf.add_member(b.clone()).unwrap();

    let frames = packet_frames(NARROWBAND);
    b.core().stats().set_output_gain(2.0);
    a.write_audio(&constant_block(NARROWBAND, frames, 1000), NARROWBAND);
    let mut out = vec![0i16; frames];
    b.read_audio(&mut out, NARROWBAND);
    assert!(out.iter().all(|&s| s == 2000));

    b.core().stats().set_mute_mask(MUTE_OUTGOING_AUDIO);
    a.write_audio(&constant_block(NARROWBAND, frames, 1000), NARROWBAND);
    b.read_audio(&mut out, NARROWBAND);
    assert!(is_silent(&out));
    assert_eq!(b.core().stats().samples_read(), 2 * frames as u64);
}

#[test]
fn test_audio_level_reaches_observer() {
    let observer = RecordingObserver::new();
    let manager = TestManager::new().with_observer(observer.clone()).build();
    let conf = manager.make_conference("room9", "Room 9").unwrap();
    let a = bridge_member("A");
    conf.add_member(a.clone()).unwrap();

    let frames = packet_frames(NARROWBAND);
    a.write_audio(&constant_block(NARROWBAND, frames, 1000), NARROWBAND);
    a.write_audio(&constant_block(NARROWBAND, frames, 1010), NARROWBAND);
    a.write_audio(&constant_block(NARROWBAND, frames, 0), NARROWBAND);
    assert_eq!(observer.levels_for(a.id()), vec![1000, 0]);
}

// ============================================================================
// Names
// ============================================================================

#[test]
fn test_second_alice_is_refused() {
    let manager = TestManager::new().build();
    let conf = manager.make_conference("room10", "Room 10").unwrap();
    conf.add_member(bridge_member("Alice")).unwrap();
    let before = conf.member_list().len();

    let err = conf.add_member(bridge_member("  ALICE ")).unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateMemberName(_)));
    assert_eq!(conf.member_list().len(), before);
    assert_eq!(conf.profile_list().len(), before);
}
