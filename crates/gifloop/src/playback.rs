//! Background playback scheduling.
//!
//! A [`GifPlayer`] moves a [`GifDecoder`] onto a dedicated worker thread that
//! paces frame production according to each frame's delay. The consumer
//! thread only ever talks to it through a command queue, a handful of
//! atomics, the shared [`FrameSurface`] and the notification signals.
//!
//! # State machine
//!
//! ```text
//! Idle --play--> Starting --frame 0--> Running <--pause/play--> Paused
//!                    ^                    |
//!                    +------play------ Complete
//! any --dispose--> Disposed
//! ```
//!
//! Seeking moves `Idle` and `Complete` to `Paused`. A frame that fails to
//! render is reported on [`GifPlayer::on_error`] and pauses the player.
//!
//! # Example
//!
//! ```no_run
//! use gifloop::GifPlayer;
//!
//! let bytes = std::fs::read("spinner.gif")?;
//! let player = GifPlayer::from_bytes(bytes)?;
//! let (width, height) = player.pixel_dimensions();
//! let mut frame = vec![0u8; (width * height * 4) as usize];
//!
//! player.on_frame_changed(|index| println!("showing frame {index}"));
//! player.play()?;
//!
//! // In the render loop:
//! if player.copy_latest_frame(&mut frame) {
//!     // upload `frame` (BGRA, stride width * 4)
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{Cursor, Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use gifloop_core::logging::targets;
use gifloop_core::{CancellationToken, ConnectionId, PeriodicTask, Signal};
use parking_lot::Mutex;

use crate::color_table::ColorTableCache;
use crate::container::GifHeader;
use crate::decoder::{FrameSurface, GifDecoder};
use crate::error::{GifError, PlaybackError, Result};

/// Default command queue capacity.
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Default upper bound on how long the worker waits before re-checking the
/// cancellation flag.
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a [`GifPlayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    /// Opened, never played.
    #[default]
    Idle,
    /// Rendering the first frame.
    Starting,
    /// Advancing frames on their delays.
    Running,
    /// Holding the current frame.
    Paused,
    /// Finished all repetitions; holding the last frame.
    Complete,
    /// Shut down. Terminal.
    Disposed,
}

/// How many times the animation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatBehavior {
    /// Loop until paused or disposed.
    Forever,
    /// Play once, then repeat this many more times.
    Count(u32),
}

impl RepeatBehavior {
    /// Interpret a NETSCAPE2.0 loop count.
    ///
    /// `Some(0)` loops forever, `Some(n)` repeats `n` times, and a missing
    /// block plays the animation once.
    pub fn from_loop_count(loop_count: Option<u16>) -> Self {
        match loop_count {
            Some(0) => Self::Forever,
            Some(n) => Self::Count(u32::from(n)),
            None => Self::Count(0),
        }
    }
}

/// Configuration for a [`GifPlayer`].
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Repeat override. `None` uses the file's loop count.
    pub repeat: Option<RepeatBehavior>,
    /// Name of the worker thread.
    pub thread_name: String,
    /// Capacity of the command queue.
    pub command_capacity: usize,
    /// Longest the worker blocks without checking for cancellation.
    pub cancel_poll_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            repeat: None,
            thread_name: "gifloop-player".to_string(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }
}

/// Builder for [`GifPlayer`]s with custom configuration.
#[derive(Debug, Default)]
pub struct PlayerBuilder {
    config: PlayerConfig,
    palettes: Option<Arc<ColorTableCache>>,
}

impl PlayerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Override the file's loop count.
    #[must_use]
    pub fn repeat(mut self, repeat: RepeatBehavior) -> Self {
        self.config.repeat = Some(repeat);
        self
    }

    /// Set the command queue capacity (minimum 1).
    #[must_use]
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.config.command_capacity = capacity.max(1);
        self
    }

    /// Set the cancellation poll interval.
    #[must_use]
    pub fn cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.config.cancel_poll_interval = interval;
        self
    }

    /// Share an existing palette cache instead of creating one.
    ///
    /// Without this, each player gets a private cache whose purge task lives
    /// as long as the player.
    #[must_use]
    pub fn palettes(mut self, palettes: Arc<ColorTableCache>) -> Self {
        self.palettes = Some(palettes);
        self
    }

    /// Parse `source` and start the worker thread.
    pub fn open<R>(self, source: R) -> Result<GifPlayer>
    where
        R: Read + Seek + Send + 'static,
    {
        let (palettes, purge_task) = match self.palettes {
            Some(palettes) => (palettes, None),
            None => {
                let palettes = Arc::new(ColorTableCache::with_defaults());
                let purge_task = palettes.spawn_purge_task();
                (palettes, purge_task)
            }
        };
        let decoder = GifDecoder::open(source, palettes)?;
        let mut player = GifPlayer::spawn(decoder, self.config);
        player.purge_task = purge_task;
        Ok(player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Pause,
    Seek(usize),
    Dispose,
}

/// State shared between the handle and the worker.
struct Shared {
    state: Mutex<PlaybackState>,
    current_frame: AtomicUsize,
    iterations: AtomicU32,
    frame_changed: Signal<usize>,
    state_changed: Signal<PlaybackState>,
    error: Signal<PlaybackError>,
}

impl Shared {
    fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    fn set_state(&self, new_state: PlaybackState) {
        let old_state = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            tracing::debug!(target: targets::PLAYBACK, from = ?old_state, to = ?new_state, "playback state changed");
            self.state_changed.emit(new_state);
        }
    }
}

/// A GIF playing on a background thread.
pub struct GifPlayer {
    shared: Arc<Shared>,
    surface: Mutex<Option<Arc<FrameSurface>>>,
    dimensions: (u32, u32),
    commands: Sender<Command>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    purge_task: Option<PeriodicTask>,
    header: GifHeader,
    delays: Vec<Duration>,
    loop_count: Option<u16>,
    repeat: RepeatBehavior,
}

impl GifPlayer {
    /// Open `source` with default settings.
    pub fn open<R>(source: R) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        PlayerBuilder::new().open(source)
    }

    /// Open an in-memory GIF with default settings.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::open(Cursor::new(bytes.into()))
    }

    /// Start configuring a player.
    pub fn builder() -> PlayerBuilder {
        PlayerBuilder::new()
    }

    /// Move an open decoding session onto a new worker thread.
    pub fn spawn<R>(decoder: GifDecoder<R>, config: PlayerConfig) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        let repeat = config
            .repeat
            .unwrap_or_else(|| RepeatBehavior::from_loop_count(decoder.loop_count()));
        let shared = Arc::new(Shared {
            state: Mutex::new(PlaybackState::Idle),
            current_frame: AtomicUsize::new(0),
            iterations: AtomicU32::new(0),
            frame_changed: Signal::new(),
            state_changed: Signal::new(),
            error: Signal::new(),
        });
        let (commands, receiver) = bounded(config.command_capacity.max(1));
        let token = CancellationToken::new();

        let surface = decoder.surface().clone();
        let dimensions = surface.dimensions();
        let header = decoder.header().clone();
        let delays = decoder.frames().iter().map(|frame| frame.delay).collect();
        let loop_count = decoder.loop_count();

        let worker = PlaybackWorker {
            decoder,
            shared: shared.clone(),
            commands: receiver,
            token: token.clone(),
            repeat,
            poll_interval: config.cancel_poll_interval,
            current: 0,
            iterations: 0,
            deadline: None,
        };

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())
            .expect("failed to spawn playback thread");

        tracing::debug!(target: targets::PLAYBACK, thread = %config.thread_name, ?repeat, "player started");

        Self {
            shared,
            surface: Mutex::new(Some(surface)),
            dimensions,
            commands,
            token,
            handle: Mutex::new(Some(handle)),
            purge_task: None,
            header,
            delays,
            loop_count,
            repeat,
        }
    }

    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.delays.len()
    }

    /// Canvas size in pixels.
    pub fn pixel_dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Logical screen information.
    pub fn header(&self) -> &GifHeader {
        &self.header
    }

    /// Display time of frame `index`.
    pub fn frame_delay(&self, index: usize) -> Option<Duration> {
        self.delays.get(index).copied()
    }

    /// The file's loop count, if it declared one.
    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count
    }

    /// The repeat behaviour in effect.
    pub fn repeat(&self) -> RepeatBehavior {
        self.repeat
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Index of the frame currently on the surface.
    pub fn current_frame_index(&self) -> usize {
        self.shared.current_frame.load(Ordering::Acquire)
    }

    /// Number of times playback has wrapped back to frame 0.
    pub fn iterations_completed(&self) -> u32 {
        self.shared.iterations.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The shared output surface, until the player is disposed.
    pub fn surface(&self) -> Option<Arc<FrameSurface>> {
        self.surface.lock().clone()
    }

    /// Copy the latest frame into `dst` as BGRA bytes with stride
    /// `width * 4`.
    ///
    /// Returns `true` only if a frame was produced since the previous
    /// successful copy. Never blocks for longer than the copy itself.
    /// Always `false` once the player is disposed.
    pub fn copy_latest_frame(&self, dst: &mut [u8]) -> bool {
        self.surface
            .lock()
            .as_ref()
            .is_some_and(|surface| surface.copy_latest_frame(dst))
    }

    /// Start or resume playback.
    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    /// Hold the current frame.
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    /// Jump to frame `index`, reconstructing the canvas as sequential
    /// playback would have left it.
    ///
    /// The index is validated here; the replay happens on the worker, which
    /// emits `frame_changed` when done.
    pub fn seek(&self, index: usize) -> Result<()> {
        if index >= self.frame_count() {
            return Err(GifError::FrameOutOfRange {
                index,
                frame_count: self.frame_count(),
            });
        }
        self.send(Command::Seek(index))
    }

    /// Stop the worker and release the stream and buffers.
    ///
    /// Blocks until the worker has exited unless called from the worker
    /// thread itself (for example from a signal handler), in which case the
    /// worker releases the decoder as soon as the handler returns. Calling it
    /// again is a no-op.
    pub fn dispose(&self) {
        if !self.token.cancel() {
            return;
        }
        let _ = self.commands.try_send(Command::Dispose);
        self.surface.lock().take();
        if let Some(task) = &self.purge_task {
            task.stop();
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(target: targets::PLAYBACK, "playback thread panicked");
            }
        }
    }

    /// Connect to frame changes. Runs on the worker thread.
    pub fn on_frame_changed<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&usize) + Send + Sync + 'static,
    {
        self.shared.frame_changed.connect(slot)
    }

    /// Connect to state changes. Runs on whichever thread changed the state.
    pub fn on_state_changed<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        self.shared.state_changed.connect(slot)
    }

    /// Connect to playback errors. Runs on the worker thread.
    pub fn on_error<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&PlaybackError) + Send + Sync + 'static,
    {
        self.shared.error.connect(slot)
    }

    /// The frame-changed signal.
    pub fn frame_changed(&self) -> &Signal<usize> {
        &self.shared.frame_changed
    }

    /// The state-changed signal.
    pub fn state_changed(&self) -> &Signal<PlaybackState> {
        &self.shared.state_changed
    }

    /// The error signal.
    pub fn error(&self) -> &Signal<PlaybackError> {
        &self.shared.error
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GifError::Disposed);
        }
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                tracing::warn!(target: targets::PLAYBACK, ?command, "command queue full; command dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(GifError::Disposed),
        }
    }
}

impl Drop for GifPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for GifPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifPlayer")
            .field("state", &self.state())
            .field("frame_count", &self.frame_count())
            .field("current_frame", &self.current_frame_index())
            .field("repeat", &self.repeat)
            .finish_non_exhaustive()
    }
}

struct PlaybackWorker<R> {
    decoder: GifDecoder<R>,
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    token: CancellationToken,
    repeat: RepeatBehavior,
    poll_interval: Duration,
    current: usize,
    iterations: u32,
    deadline: Option<Instant>,
}

impl<R: Read + Seek> PlaybackWorker<R> {
    fn run(mut self) {
        while !self.token.is_cancelled() {
            let wait = match self.deadline {
                Some(deadline) if self.state() == PlaybackState::Running => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.poll_interval),
                _ => self.poll_interval,
            };

            match self.commands.recv_timeout(wait) {
                Ok(Command::Dispose) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {
                    if self.state() == PlaybackState::Running
                        && self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
                    {
                        self.advance();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.shared.set_state(PlaybackState::Disposed);
        tracing::debug!(target: targets::PLAYBACK, "player stopped");
        // `self.decoder` and with it the source stream drop here.
    }

    fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    fn handle(&mut self, command: Command) {
        match (command, self.state()) {
            (Command::Play, PlaybackState::Idle | PlaybackState::Complete) => self.start(),
            (Command::Play, PlaybackState::Paused) => {
                self.deadline = Some(Instant::now() + self.delay(self.current));
                self.shared.set_state(PlaybackState::Running);
            }
            (Command::Pause, PlaybackState::Running) => {
                self.deadline = None;
                self.shared.set_state(PlaybackState::Paused);
            }
            (Command::Seek(index), _) => self.seek(index),
            (command, state) => {
                tracing::trace!(target: targets::PLAYBACK, ?command, ?state, "command ignored");
            }
        }
    }

    fn start(&mut self) {
        self.iterations = 0;
        self.shared.iterations.store(0, Ordering::Release);
        self.shared.set_state(PlaybackState::Starting);

        let started = Instant::now();
        match self.decoder.render_frame(0) {
            Ok(()) => {
                self.show(0, started);
                self.shared.set_state(PlaybackState::Running);
            }
            Err(err) => self.fail(&err, 0),
        }
    }

    fn advance(&mut self) {
        let frame_count = self.decoder.frame_count();
        if frame_count == 0 {
            return;
        }

        let next = (self.current + 1) % frame_count;
        if next == 0 {
            self.iterations = self.iterations.saturating_add(1);
            self.shared.iterations.store(self.iterations, Ordering::Release);
            if let RepeatBehavior::Count(repeats) = self.repeat
                && self.iterations > repeats
            {
                self.deadline = None;
                self.shared.set_state(PlaybackState::Complete);
                return;
            }
        }

        let started = Instant::now();
        match self.decoder.render_frame(next) {
            Ok(()) => self.show(next, started),
            Err(err) => self.fail(&err, next),
        }
    }

    fn seek(&mut self, index: usize) {
        let started = Instant::now();
        match self.decoder.seek(index) {
            Ok(()) => {
                self.show(index, started);
                match self.state() {
                    PlaybackState::Idle | PlaybackState::Complete => {
                        self.deadline = None;
                        self.shared.set_state(PlaybackState::Paused);
                    }
                    PlaybackState::Paused => self.deadline = None,
                    _ => {}
                }
            }
            Err(err) => self.fail(&err, index),
        }
    }

    /// Record `index` as shown; the next frame is due one delay after
    /// `started`.
    fn show(&mut self, index: usize, started: Instant) {
        self.current = index;
        self.shared.current_frame.store(index, Ordering::Release);
        self.deadline = Some(started + self.delay(index));
        tracing::trace!(target: targets::PLAYBACK, frame = index, "frame ready");
        self.shared.frame_changed.emit(index);
    }

    fn fail(&mut self, err: &GifError, frame: usize) {
        tracing::warn!(target: targets::PLAYBACK, frame, error = %err, "frame failed to render; pausing");
        self.deadline = None;
        self.shared.error.emit(PlaybackError::from_error(err, Some(frame)));
        self.shared.set_state(PlaybackState::Paused);
    }

    fn delay(&self, index: usize) -> Duration {
        self.decoder
            .frames()
            .get(index)
            .map_or(crate::container::DEFAULT_FRAME_DELAY, |frame| frame.delay)
    }
}
