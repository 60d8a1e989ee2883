use std::str::FromStr;
use std::time::Instant;

use serde_json::json;
use tracing::debug;

use crate::effect::EffectRequest;
use crate::error::{BridgeError, Result};
use crate::state::{DeviceState, SharedState};

use super::client::CommandQueue;
use super::{OutboundCommand, PING_METHOD};

/// Prefix-relative topics the bridge subscribes to.
pub const CONTROL_TOPICS: &[&str] = &[
    "heartbeat",
    "alarm",
    "alarm/time_to_activate",
    "alarm/duration",
    "light",
    "brightness",
    "rgb",
    "sound",
    "sound/sound",
    "sound/volume",
    "sound/alarming/volume",
    "sound/alarming/sound",
    "sound/doorbell/volume",
    "sound/doorbell/sound",
    "effect/blink",
    "effect/slowblink",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Switch::On => "on",
            Switch::Off => "off",
        }
    }
}

impl FromStr for Switch {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            _ => Err(BridgeError::invalid("switch", s)),
        }
    }
}

pub fn ping() -> OutboundCommand {
    OutboundCommand::new("broker", PING_METHOD, None, true)
}

pub fn get_arming() -> OutboundCommand {
    OutboundCommand::new("alarm", "get_arming", None, true)
}

pub fn set_arming(state: Switch) -> OutboundCommand {
    OutboundCommand::new("alarm", "set_arming", Some(json!([state.as_str()])), false)
}

pub fn set_arming_time(seconds: u32) -> OutboundCommand {
    OutboundCommand::new("alarm/time_to_activate", "set_arming_time", Some(json!([seconds])), true)
}

pub fn set_alarm_duration(seconds: u32) -> OutboundCommand {
    OutboundCommand::new(
        "alarm/duration",
        "set_device_prop",
        Some(json!({"sid": "lumi.0", "alarm_time_len": seconds})),
        true,
    )
}

pub fn set_alarm_volume(volume: u8) -> OutboundCommand {
    OutboundCommand::new("sound/alarming/volume", "set_alarming_volume", Some(json!([volume])), true)
}

pub fn set_alarm_sound(sound: u32) -> OutboundCommand {
    OutboundCommand::new(
        "sound/alarming/sound",
        "set_alarming_sound",
        Some(json!([0, sound.to_string()])),
        true,
    )
}

pub fn set_doorbell_volume(volume: u8) -> OutboundCommand {
    OutboundCommand::new("sound/doorbell/volume", "set_doorbell_volume", Some(json!([volume])), true)
}

pub fn set_doorbell_sound(sound: u32) -> OutboundCommand {
    OutboundCommand::new(
        "sound/doorbell/sound",
        "set_doorbell_sound",
        Some(json!([1, sound.to_string()])),
        true,
    )
}

pub fn set_volume(volume: u8) -> OutboundCommand {
    OutboundCommand::new("sound/volume", "set_gateway_volume", Some(json!([volume])), true)
}

pub fn play_sound(sound: u32, volume: u8) -> OutboundCommand {
    OutboundCommand::new(
        "sound",
        "play_music_new",
        Some(json!([sound.to_string(), volume])),
        false,
    )
}

pub fn stop_sound() -> OutboundCommand {
    OutboundCommand::new("sound", "set_sound_playing", Some(json!(["off"])), false)
}

pub fn set_light(state: Switch) -> OutboundCommand {
    OutboundCommand::new("light", "toggle_light", Some(json!([state.as_str()])), false)
}

/// The gateway takes brightness and color packed as `brightness << 24 | rgb`.
pub fn set_rgb(brightness: u8, color: u32) -> OutboundCommand {
    let packed = (u64::from(brightness) << 24) + u64::from(color & 0xFF_FFFF);
    OutboundCommand::new("rgb", "set_rgb", Some(json!([packed])), false)
}

/// Requests sent once before the loop starts, bringing the gateway in line
/// with the configured state.
pub fn startup_commands(device: &DeviceState, silent_start: bool) -> Vec<OutboundCommand> {
    let mut commands = vec![ping(), get_arming(), set_arming_time(device.arming_time)];
    if !silent_start {
        commands.extend([
            set_alarm_duration(device.alarm_duration),
            set_alarm_volume(device.alarm_volume),
            set_alarm_sound(device.alarm_sound),
            set_doorbell_volume(device.doorbell_volume),
            set_doorbell_sound(device.doorbell_sound),
            // the settings above make the gateway play tones
            stop_sound(),
        ]);
    }
    commands.push(set_rgb(device.brightness, device.light_rgb));
    commands
}

fn parse_number(field: &'static str, payload: &str) -> Result<u32> {
    payload
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
        .ok_or_else(|| BridgeError::invalid(field, payload))
}

fn parse_percent(field: &'static str, payload: &str) -> Result<u8> {
    let n = parse_number(field, payload)?;
    u8::try_from(n)
        .ok()
        .filter(|n| *n <= 100)
        .ok_or_else(|| BridgeError::invalid(field, payload))
}

fn parse_color(payload: &str) -> Result<u32> {
    u32::from_str_radix(payload.trim_start_matches('#'), 16)
        .ok()
        .filter(|c| *c <= 0xFF_FFFF)
        .ok_or_else(|| BridgeError::invalid("rgb", payload))
}

/// Translate a message on a control topic into queued gateway requests
/// and state changes.
///
/// State is only updated once the queue accepted the request. A full queue
/// drops the command without error.
pub fn dispatch(
    topic: &str,
    payload: &str,
    queue: &CommandQueue,
    state: &SharedState,
    now: Instant,
) -> Result<()> {
    let payload = payload.trim();
    let mut state = state.lock();
    let device = &mut state.device;

    match topic {
        "heartbeat" => {
            queue.push(get_arming());
        }
        "alarm" => {
            queue.push(set_arming(payload.parse::<Switch>()?));
        }
        "alarm/time_to_activate" => {
            let seconds = parse_number("arming_time", payload)?;
            if queue.push(set_arming_time(seconds)) {
                device.arming_time = seconds;
            }
        }
        "alarm/duration" => {
            let seconds = parse_number("alarm_duration", payload)?;
            if queue.push(set_alarm_duration(seconds)) {
                device.alarm_duration = seconds;
            }
        }
        "light" => {
            queue.push(set_light(payload.parse::<Switch>()?));
        }
        "brightness" => {
            let brightness = parse_percent("brightness", payload)?;
            if queue.push(set_rgb(brightness, device.light_rgb)) {
                device.brightness = brightness;
            }
        }
        "rgb" => {
            let color = parse_color(payload)?;
            if queue.push(set_rgb(device.brightness, color)) {
                device.light_rgb = color;
            }
        }
        "sound" => match payload.parse::<Switch>()? {
            Switch::On => {
                queue.push(play_sound(device.sound, device.sound_volume));
            }
            Switch::Off => {
                queue.push(stop_sound());
            }
        },
        "sound/sound" => {
            device.sound = parse_number("sound", payload)?;
        }
        "sound/volume" => {
            let volume = parse_percent("sound_volume", payload)?;
            if queue.push(set_volume(volume)) {
                device.sound_volume = volume;
            }
        }
        "sound/alarming/volume" => {
            let volume = parse_percent("alarm_volume", payload)?;
            if queue.push(set_alarm_volume(volume)) {
                device.alarm_volume = volume;
            }
        }
        "sound/alarming/sound" => {
            let sound = parse_number("alarm_sound", payload)?;
            if queue.push(set_alarm_sound(sound)) {
                device.alarm_sound = sound;
            }
        }
        "sound/doorbell/volume" => {
            let volume = parse_percent("doorbell_volume", payload)?;
            if queue.push(set_doorbell_volume(volume)) {
                device.doorbell_volume = volume;
            }
        }
        "sound/doorbell/sound" => {
            let sound = parse_number("doorbell_sound", payload)?;
            if queue.push(set_doorbell_sound(sound)) {
                device.doorbell_sound = sound;
            }
        }
        "effect/blink" => {
            let request = EffectRequest::parse_blink(payload, device.brightness)?;
            let color = device.light_rgb;
            if state.effect.is_active() {
                debug!("Replacing running effect");
            }
            state.effect.start(request, color, now);
        }
        "effect/slowblink" => {
            let request = EffectRequest::parse_slow_blink(payload)?;
            let color = device.light_rgb;
            if state.effect.is_active() {
                debug!("Replacing running effect");
            }
            state.effect.start(request, color, now);
        }
        _ => return Err(BridgeError::UnknownTopic(topic.to_string())),
    }

    debug!("Handled {} = {} ({} queued)", topic, payload, queue.len());
    Ok(())
}
