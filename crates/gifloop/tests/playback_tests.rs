//! Background playback scheduling tests.

mod common;

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use gifloop::{
    ColorTableCache, ErrorKind, GifDecoder, GifError, GifPlayer, PlaybackError, PlaybackState,
    RepeatBehavior,
};
use parking_lot::Mutex;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn record_frames(player: &GifPlayer) -> Arc<Mutex<Vec<usize>>> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    player.on_frame_changed(move |index| sink.lock().push(*index));
    frames
}

fn record_states(player: &GifPlayer) -> Arc<Mutex<Vec<PlaybackState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    player.on_state_changed(move |state| sink.lock().push(*state));
    states
}

#[test]
fn test_two_frame_loop_scenario() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    assert_eq!(player.frame_count(), 2);
    assert_eq!(player.pixel_dimensions(), (4, 4));
    assert_eq!(player.header().global_color_table_size, 4);
    assert_eq!(player.loop_count(), Some(0));
    assert_eq!(player.repeat(), RepeatBehavior::Forever);
    assert_eq!(player.frame_delay(1), Some(Duration::from_millis(100)));

    let frames = record_frames(&player);
    let mut buf = vec![0u8; 4 * 4 * 4];
    assert!(!player.copy_latest_frame(&mut buf));

    player.play().unwrap();
    let started = Instant::now();
    let mut copies = 0;
    while started.elapsed() < Duration::from_millis(280) {
        if player.copy_latest_frame(&mut buf) {
            copies += 1;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(copies >= 2, "only {copies} new frames copied");

    let seen = frames.lock().clone();
    assert!(seen.len() >= 3, "frames shown: {seen:?}");
    assert_eq!(&seen[..3], &[0, 1, 0]);

    player.pause().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Paused
    }));
    player.copy_latest_frame(&mut buf);
    assert!(!player.copy_latest_frame(&mut buf));

    let expected = if player.current_frame_index() == 0 { RED } else { GREEN };
    assert_eq!(&buf[..4], &bgra(expected));
}

#[test]
fn test_pause_holds_frame_and_play_resumes() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    let frames = record_frames(&player);
    let states = record_states(&player);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || frames.lock().len() >= 2));
    player.pause().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Paused
    }));

    let held = player.current_frame_index();
    let shown = frames.lock().len();
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(frames.lock().len(), shown);
    assert_eq!(player.current_frame_index(), held);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || frames.lock().len() > shown));
    assert_eq!(player.state(), PlaybackState::Running);

    let states = states.lock().clone();
    assert_eq!(
        &states[..4],
        &[
            PlaybackState::Starting,
            PlaybackState::Running,
            PlaybackState::Paused,
            PlaybackState::Running
        ]
    );
}

#[test]
fn test_finite_repeat_completes_on_last_frame() {
    init_tracing();
    let bytes = GifBuilder::new(2, 2)
        .global_palette(vec![RED, GREEN])
        .frame(FrameSpec::solid(0, 0, 2, 2, 0).delay(1))
        .frame(FrameSpec::solid(0, 0, 2, 2, 1).delay(1))
        .build();
    let player = GifPlayer::builder()
        .name("repeat-test")
        .repeat(RepeatBehavior::Count(1))
        .open(Cursor::new(bytes))
        .unwrap();
    let frames = record_frames(&player);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.state() == PlaybackState::Complete
    }));
    assert_eq!(*frames.lock(), vec![0, 1, 0, 1]);
    assert_eq!(player.current_frame_index(), 1);
    assert_eq!(player.iterations_completed(), 2);

    // Play after completion starts over.
    frames.lock().clear();
    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || frames.lock().len() == 4
        && player.state() == PlaybackState::Complete));
    assert_eq!(frames.lock()[0], 0);
}

#[test]
fn test_missing_loop_block_plays_once() {
    init_tracing();
    let bytes = GifBuilder::new(1, 1)
        .global_palette(vec![RED, GREEN])
        .frame(FrameSpec::solid(0, 0, 1, 1, 0).delay(1))
        .frame(FrameSpec::solid(0, 0, 1, 1, 1).delay(1))
        .build();
    let player = GifPlayer::from_bytes(bytes).unwrap();
    assert_eq!(player.loop_count(), None);
    assert_eq!(player.repeat(), RepeatBehavior::Count(0));

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.state() == PlaybackState::Complete
    }));
    assert_eq!(player.iterations_completed(), 1);
}

#[test]
fn test_seek_while_idle_pauses_on_target() {
    init_tracing();
    let bytes = GifBuilder::new(2, 1)
        .global_palette(vec![RED, GREEN, BLUE, WHITE])
        .frame(FrameSpec::solid(0, 0, 2, 1, 0))
        .frame(FrameSpec::solid(1, 0, 1, 1, 1))
        .frame(FrameSpec::solid(0, 0, 1, 1, 2))
        .build();
    let player = GifPlayer::from_bytes(bytes).unwrap();
    let frames = record_frames(&player);

    assert!(matches!(
        player.seek(3),
        Err(GifError::FrameOutOfRange { index: 3, frame_count: 3 })
    ));

    player.seek(2).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Paused
    }));
    assert_eq!(*frames.lock(), vec![2]);
    assert_eq!(player.current_frame_index(), 2);

    let mut buf = vec![0u8; 8];
    assert!(player.copy_latest_frame(&mut buf));
    assert_eq!(&buf[..4], &bgra(BLUE));
    assert_eq!(&buf[4..], &bgra(GREEN));
}

#[test]
fn test_render_error_reports_and_pauses() {
    init_tracing();
    let bytes = GifBuilder::new(2, 2)
        .global_palette(vec![RED, GREEN])
        .loop_count(0)
        .frame(FrameSpec::solid(0, 0, 2, 2, 0).delay(1))
        .frame(FrameSpec::solid(0, 0, 2, 2, 1).delay(1))
        .build();

    // Corrupt frame 1's LZW minimum code size.
    let offset = {
        let decoder = GifDecoder::open(
            Cursor::new(bytes.clone()),
            Arc::new(ColorTableCache::with_defaults()),
        )
        .unwrap();
        decoder.frames()[1].lzw_stream_offset as usize - 1
    };
    let mut corrupt = bytes;
    corrupt[offset] = 12;

    let player = GifPlayer::from_bytes(corrupt).unwrap();
    let errors: Arc<Mutex<Vec<PlaybackError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    player.on_error(move |err| sink.lock().push(err.clone()));

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !errors.lock().is_empty()));
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Paused
    }));

    let report = errors.lock()[0].clone();
    assert_eq!(report.kind, ErrorKind::Rendering);
    assert_eq!(report.frame_index, Some(1));
    assert_eq!(player.current_frame_index(), 0);
    assert!(!player.is_disposed());
}

#[test]
fn test_dispose_is_idempotent() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    let states = record_states(&player);
    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Running
    }));

    player.dispose();
    player.dispose();
    assert!(player.is_disposed());
    assert_eq!(player.state(), PlaybackState::Disposed);
    assert_eq!(
        states.lock().iter().filter(|s| **s == PlaybackState::Disposed).count(),
        1
    );

    assert!(matches!(player.play(), Err(GifError::Disposed)));
    assert!(matches!(player.pause(), Err(GifError::Disposed)));
}

#[test]
fn test_drop_stops_worker() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    let states = record_states(&player);
    player.play().unwrap();
    drop(player);
    assert_eq!(states.lock().last(), Some(&PlaybackState::Disposed));
}

#[test]
fn test_dispose_from_signal_handler() {
    init_tracing();
    let player = Arc::new(GifPlayer::from_bytes(two_frame_loop()).unwrap());
    let weak = Arc::downgrade(&player);
    player.on_frame_changed(move |index| {
        if *index == 1
            && let Some(player) = weak.upgrade()
        {
            player.dispose();
        }
    });

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.state() == PlaybackState::Disposed
    }));
    assert!(player.is_disposed());
}

fn four_solid_frames(delay_hundredths: u16) -> Vec<u8> {
    let mut builder = GifBuilder::new(2, 2).global_palette(vec![RED, GREEN, BLUE, WHITE]);
    for index in 0..4 {
        builder = builder.frame(FrameSpec::solid(0, 0, 2, 2, index).delay(delay_hundredths));
    }
    builder.loop_count(0).build()
}

fn record_frame_times(player: &GifPlayer) -> Arc<Mutex<Vec<(usize, Instant)>>> {
    let shown = Arc::new(Mutex::new(Vec::new()));
    let sink = shown.clone();
    player.on_frame_changed(move |index| sink.lock().push((*index, Instant::now())));
    shown
}

#[test]
fn test_seek_after_complete_pauses_on_target() {
    init_tracing();
    let player = GifPlayer::builder()
        .repeat(RepeatBehavior::Count(0))
        .open(Cursor::new(four_solid_frames(1)))
        .unwrap();
    let frames = record_frames(&player);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.state() == PlaybackState::Complete
    }));
    assert_eq!(player.current_frame_index(), 3);

    frames.lock().clear();
    player.seek(1).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        player.state() == PlaybackState::Paused
    }));
    assert_eq!(*frames.lock(), vec![1]);
    assert_eq!(player.current_frame_index(), 1);

    let mut buf = vec![0u8; 2 * 2 * 4];
    assert!(player.copy_latest_frame(&mut buf));
    assert!(buf.chunks(4).all(|px| px == bgra(GREEN)));

    // Paused holds the target.
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(*frames.lock(), vec![1]);
}

#[test]
fn test_seek_while_running_continues_from_target() {
    init_tracing();
    let player = GifPlayer::from_bytes(four_solid_frames(30)).unwrap();
    let shown = record_frame_times(&player);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(1), || !shown.lock().is_empty()));
    player.seek(2).unwrap();

    assert!(wait_until(Duration::from_secs(2), || shown.lock().len() >= 3));
    assert_eq!(player.state(), PlaybackState::Running);
    let shown = shown.lock().clone();
    let order: Vec<usize> = shown.iter().map(|(index, _)| *index).collect();
    assert_eq!(&order[..3], &[0, 2, 3]);

    // The target gets a full delay of its own before playback moves on.
    let held = shown[2].1 - shown[1].1;
    assert!(held >= Duration::from_millis(250), "target held for {held:?}");
    assert!(held < Duration::from_secs(1), "target held for {held:?}");
}

#[test]
fn test_frames_follow_their_delays() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    let shown = record_frame_times(&player);

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || shown.lock().len() >= 5));
    player.pause().unwrap();

    let shown = shown.lock().clone();
    let gaps: Vec<Duration> = shown.windows(2).take(4).map(|pair| pair[1].1 - pair[0].1).collect();
    for gap in &gaps {
        assert!(*gap >= Duration::from_millis(80), "gaps {gaps:?}");
        assert!(*gap < Duration::from_millis(300), "gaps {gaps:?}");
    }
    // Deadlines are taken from the start of each render, so lateness does
    // not accumulate.
    let total: Duration = gaps.iter().sum();
    assert!(total < Duration::from_millis(550), "gaps {gaps:?}");
}

#[test]
fn test_dispose_releases_surface() {
    init_tracing();
    let player = GifPlayer::from_bytes(two_frame_loop()).unwrap();
    let frames = record_frames(&player);
    let surface = player.surface().expect("surface before dispose");

    player.play().unwrap();
    assert!(wait_until(Duration::from_secs(1), || !frames.lock().is_empty()));
    assert!(surface.has_new_frame());

    player.dispose();
    assert!(player.surface().is_none());
    assert_eq!(Arc::strong_count(&surface), 1);

    let mut buf = vec![0u8; 4 * 4 * 4];
    assert!(!player.copy_latest_frame(&mut buf));
}
