use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::error::Result;
use crate::events::{Listeners, PlayerEventListener};
use crate::mpd::MpdProvider;
use crate::scheduler::Scheduler;
use crate::types::PlaybackState;

/// The consumer loop: drains the buffer at wall-clock playback rate and
/// drives the BUFFERING/READY/END state machine.
pub struct DashPlayer {
    min_start_duration: f64,
    min_rebuffer_duration: f64,
    time_factor: f64,
    buffer: Arc<BufferManager>,
    scheduler: Arc<Scheduler>,
    mpd_provider: Arc<MpdProvider>,
    state: Mutex<PlaybackState>,
    listeners: Listeners<dyn PlayerEventListener>,
}

impl DashPlayer {
    pub fn new(
        config: &PlayerConfig,
        buffer: Arc<BufferManager>,
        scheduler: Arc<Scheduler>,
        mpd_provider: Arc<MpdProvider>,
    ) -> Self {
        Self {
            min_start_duration: config.min_start_duration,
            min_rebuffer_duration: config.min_rebuffer_duration,
            time_factor: config.time_factor,
            buffer,
            scheduler,
            mpd_provider,
            state: Mutex::new(PlaybackState::Idle),
            listeners: Listeners::new(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerEventListener>) {
        self.listeners.add(listener);
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Broadcast only real transitions; repeated READY announcements carry
    /// no information and would pollute the stall history.
    async fn switch_state(&self, position: f64, new_state: PlaybackState) {
        let old_state = {
            let mut state = self.state.lock().unwrap();
            let old_state = *state;
            *state = new_state;
            old_state
        };
        if old_state == new_state {
            return;
        }
        info!("switching state from {old_state} to {new_state} at position {position:.3}");
        for listener in self.listeners.snapshot() {
            listener.on_state_change(position, old_state, new_state).await;
        }
    }

    async fn publish_position(&self, position: f64) {
        for listener in self.listeners.snapshot() {
            listener.on_position_change(position).await;
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.mpd_provider.available().await;

        let mut playback_started = false;
        let mut first_start_time: Option<f64> = None;
        let mut position = 0.0;
        self.switch_state(position, PlaybackState::Buffering).await;

        loop {
            // Wait for enough media, or for the stream to end
            let threshold = if playback_started { self.min_rebuffer_duration } else { self.min_start_duration };
            self.buffer
                .wait_until(|| self.buffer.buffer_level() >= threshold || self.scheduler.is_end())
                .await;
            if self.buffer.is_empty() && self.scheduler.is_end() {
                self.switch_state(position, PlaybackState::End).await;
                return Ok(());
            }
            self.switch_state(position, PlaybackState::Ready).await;

            while let Some(item) = self.buffer.next_item() {
                let group_start = item
                    .segments
                    .values()
                    .map(|s| s.start_time)
                    .fold(f64::INFINITY, f64::min);
                let origin = *first_start_time.get_or_insert(group_start);
                position = group_start - origin;
                self.publish_position(position).await;
                for listener in self.listeners.snapshot() {
                    listener.on_segment_playback_start(&item.segments).await;
                }
                playback_started = true;

                debug!(position, duration = item.max_duration, "playing segment group");
                sleep(Duration::from_secs_f64(self.time_factor * item.max_duration)).await;

                position += item.max_duration;
                self.publish_position(position).await;
                self.buffer.dequeue_buffer().await;

                if self.buffer.is_empty() {
                    if self.scheduler.is_end() {
                        self.switch_state(position, PlaybackState::End).await;
                        return Ok(());
                    }
                    self.switch_state(position, PlaybackState::Buffering).await;
                    break;
                }
            }
        }
    }
}
