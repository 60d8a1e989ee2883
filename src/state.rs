use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::InitialStates;
use crate::effect::EffectEngine;
use crate::miio::PONG_TIMEOUT;

/// Last known value of every control dimension of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub sound: u32,
    pub sound_volume: u8,
    pub light_rgb: u32,
    pub brightness: u8,
    pub doorbell_volume: u8,
    pub doorbell_sound: u32,
    pub alarm_volume: u8,
    pub alarm_sound: u32,
    pub arming_time: u32,
    pub alarm_duration: u32,
}

impl From<&InitialStates> for DeviceState {
    fn from(initial: &InitialStates) -> Self {
        Self {
            sound: initial.sound,
            sound_volume: initial.sound_volume,
            light_rgb: initial.light_rgb,
            brightness: initial.brightness,
            doorbell_volume: initial.doorbell_volume,
            doorbell_sound: initial.doorbell_sound,
            alarm_volume: initial.alarm_volume,
            alarm_sound: initial.alarm_sound,
            arming_time: initial.arming_time,
            alarm_duration: initial.alarm_duration,
        }
    }
}

/// Tracks when the gateway last answered a ping.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    last_pong: Option<Instant>,
}

impl LivenessTracker {
    pub fn record_pong(&mut self, at: Instant) {
        self.last_pong = Some(at);
    }

    /// False until the first pong, and once `PONG_TIMEOUT` passed since the last one.
    pub fn is_recent(&self, now: Instant) -> bool {
        self.last_pong
            .is_some_and(|last| now.saturating_duration_since(last) <= PONG_TIMEOUT)
    }
}

/// Everything the bus side and the governing loop both touch.
#[derive(Debug)]
pub struct BridgeState {
    pub device: DeviceState,
    pub liveness: LivenessTracker,
    pub effect: EffectEngine,
}

impl BridgeState {
    pub fn new(initial: &InitialStates) -> Self {
        Self {
            device: DeviceState::from(initial),
            liveness: LivenessTracker::default(),
            effect: EffectEngine::default(),
        }
    }
}

/// The whole state map sits behind one lock. Never hold it across an await.
pub type SharedState = Arc<Mutex<BridgeState>>;

pub fn shared(initial: &InitialStates) -> SharedState {
    Arc::new(Mutex::new(BridgeState::new(initial)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn liveness_expires_after_pong_timeout() {
        let mut tracker = LivenessTracker::default();
        let t0 = Instant::now();
        assert!(!tracker.is_recent(t0));

        tracker.record_pong(t0);
        assert!(tracker.is_recent(t0));
        assert!(tracker.is_recent(t0 + Duration::from_secs(300)));
        assert!(!tracker.is_recent(t0 + Duration::from_secs(301)));
    }

    #[test]
    fn device_state_starts_from_initial_values() {
        let state = BridgeState::new(&InitialStates::default());
        assert_eq!(state.device.light_rgb, 0xFF_FFFF);
        assert_eq!(state.device.brightness, 54);
        assert!(!state.effect.is_active());
    }
}
