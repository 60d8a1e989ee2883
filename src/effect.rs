//! Time-driven lighting effects.
//!
//! The engine never schedules anything itself. The governing loop calls
//! [`EffectEngine::tick`] once per iteration and gets back the light command
//! to send, if any. Calls closer than [`TICK_INTERVAL`] to the previous one
//! do nothing.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{BridgeError, Result};
use crate::miio::OutboundCommand;
use crate::miio::commands::{Switch, set_light, set_rgb};

pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSetting {
    pub color: u32,
    pub brightness: u8,
}

/// A parsed effect command, not yet started.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectRequest {
    /// Alternate between two color/brightness pairs.
    Blink {
        first: LightSetting,
        second: LightSetting,
        duration: Duration,
    },
    /// Fade up from the current color to `target_color`, over and over.
    SlowBlink {
        target_color: u32,
        pulse_period: Duration,
        duration: Duration,
    },
}

fn parse_seconds(field: &'static str, s: &str) -> Result<Duration> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| BridgeError::invalid(field, s))
}

fn parse_hex(field: &'static str, s: &str) -> Result<u32> {
    u32::from_str_radix(s.trim().trim_start_matches('#'), 16)
        .map_err(|_| BridgeError::invalid(field, s))
}

/// A hex value above 0xFFFFFF carries the brightness in its top byte.
///
/// A packed value whose brightness byte is zero (`00ff0000`) reads the same
/// as the plain color and takes `default_brightness`; a zero brightness
/// cannot be requested this way.
fn parse_setting(s: &str, default_brightness: u8) -> Result<LightSetting> {
    let value = parse_hex("blink color", s)?;
    let brightness = match value >> 24 {
        0 => default_brightness,
        b => b as u8,
    };
    Ok(LightSetting {
        color: value & 0xFF_FFFF,
        brightness,
    })
}

impl EffectRequest {
    /// `first:second:seconds`, colors in hex, optionally brightness-packed.
    /// Colors without a brightness byte use `default_brightness`.
    pub fn parse_blink(payload: &str, default_brightness: u8) -> Result<Self> {
        let parts: Vec<&str> = payload.split(':').collect();
        let [first, second, duration] = parts.as_slice() else {
            return Err(BridgeError::invalid("blink", payload));
        };
        Ok(EffectRequest::Blink {
            first: parse_setting(first, default_brightness)?,
            second: parse_setting(second, default_brightness)?,
            duration: parse_seconds("blink duration", duration)?,
        })
    }

    /// `targetColor:pulseSeconds:seconds`.
    pub fn parse_slow_blink(payload: &str) -> Result<Self> {
        let parts: Vec<&str> = payload.split(':').collect();
        let [target, period, duration] = parts.as_slice() else {
            return Err(BridgeError::invalid("slowblink", payload));
        };
        let target_color = parse_hex("slowblink color", target)?;
        if target_color > 0xFF_FFFF {
            return Err(BridgeError::invalid("slowblink color", target));
        }
        Ok(EffectRequest::SlowBlink {
            target_color,
            pulse_period: parse_seconds("slowblink period", period)?,
            duration: parse_seconds("slowblink duration", duration)?,
        })
    }
}

/// Value at `tx` on the line through `(t0, c0)` and `(t1, c1)`; exactly
/// `c1` from `t1` on.
pub fn interpolate(t0: f64, t1: f64, tx: f64, c0: f64, c1: f64) -> f64 {
    if tx >= t1 {
        return c1;
    }
    c0 + (c1 - c0) * (tx - t0) / (t1 - t0)
}

#[derive(Debug, Clone, PartialEq)]
enum Effect {
    Blink {
        first: LightSetting,
        second: LightSetting,
        showing_second: bool,
    },
    SlowBlink {
        start_color: u32,
        target_color: u32,
        pulse_period: Duration,
        pulse_start: Instant,
        pulse_end: Instant,
    },
}

impl Effect {
    fn advance(&mut self, now: Instant) -> LightSetting {
        match self {
            Effect::Blink {
                first,
                second,
                showing_second,
            } => {
                *showing_second = !*showing_second;
                if *showing_second { *second } else { *first }
            }
            Effect::SlowBlink {
                start_color,
                target_color,
                pulse_period,
                pulse_start,
                pulse_end,
            } => {
                let t1 = pulse_period.as_secs_f64();
                let tx = now.duration_since(*pulse_start).as_secs_f64();

                let color = [16u32, 8, 0].iter().fold(0u32, |color, shift| {
                    let c0 = f64::from((*start_color >> shift) & 0xFF);
                    let c1 = f64::from((*target_color >> shift) & 0xFF);
                    let channel = interpolate(0.0, t1, tx, c0, c1).round() as u32;
                    color | (channel.min(0xFF) << shift)
                });
                let setting = LightSetting {
                    color,
                    brightness: interpolate(0.0, t1, tx, 0.0, 100.0).round() as u8,
                };

                // the tick that closes a window shows the target, the next one
                // starts the following window from the bottom
                if now >= *pulse_end {
                    *pulse_start = now;
                    *pulse_end = now + *pulse_period;
                }
                setting
            }
        }
    }
}

#[derive(Debug)]
struct ActiveEffect {
    effect: Effect,
    end_time: Instant,
    last_tick: Option<Instant>,
}

/// Holds the one running effect, if any.
#[derive(Debug, Default)]
pub struct EffectEngine {
    active: Option<ActiveEffect>,
}

impl EffectEngine {
    /// Start `request`, replacing whatever was running.
    pub fn start(&mut self, request: EffectRequest, current_color: u32, now: Instant) {
        let (effect, duration) = match request {
            EffectRequest::Blink {
                first,
                second,
                duration,
            } => (
                Effect::Blink {
                    first,
                    second,
                    showing_second: true,
                },
                duration,
            ),
            EffectRequest::SlowBlink {
                target_color,
                pulse_period,
                duration,
            } => (
                Effect::SlowBlink {
                    start_color: current_color,
                    target_color,
                    pulse_period,
                    pulse_start: now,
                    pulse_end: now + pulse_period,
                },
                duration,
            ),
        };
        info!("Starting effect {:?} for {:?}", effect, duration);
        self.active = Some(ActiveEffect {
            effect,
            end_time: now + duration,
            last_tick: None,
        });
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Advance the running effect. Once it is over, returns a single
    /// light-off command and goes idle.
    pub fn tick(&mut self, now: Instant) -> Option<OutboundCommand> {
        let active = self.active.as_mut()?;

        if now > active.end_time {
            self.active = None;
            info!("Effect finished");
            return Some(set_light(Switch::Off));
        }
        if active
            .last_tick
            .is_some_and(|last| now.duration_since(last) < TICK_INTERVAL)
        {
            return None;
        }
        active.last_tick = Some(now);

        let setting = active.effect.advance(now);
        Some(set_rgb(setting.brightness, setting.color))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn packed(cmd: &OutboundCommand) -> (u8, u32) {
        let value = cmd.params.as_ref().and_then(|p| p[0].as_u64()).unwrap();
        ((value >> 24) as u8, (value & 0xFF_FFFF) as u32)
    }

    #[test]
    fn interpolate_follows_line_and_clamps_at_end() {
        assert_eq!(interpolate(0.0, 10.0, 5.0, 0.0, 100.0), 50.0);
        assert_eq!(interpolate(0.0, 10.0, 10.0, 0.0, 100.0), 100.0);
        assert_eq!(interpolate(0.0, 10.0, 12.0, 0.0, 100.0), 100.0);
        assert_eq!(interpolate(2.0, 4.0, 3.0, 200.0, 100.0), 150.0);
    }

    #[test]
    fn parses_blink_with_packed_and_plain_colors() {
        let request = EffectRequest::parse_blink("32ff0000:0000ff:5", 54).unwrap();
        assert_eq!(
            request,
            EffectRequest::Blink {
                first: LightSetting { color: 0xFF0000, brightness: 0x32 },
                second: LightSetting { color: 0x0000FF, brightness: 54 },
                duration: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn rejects_malformed_effect_payloads() {
        assert!(EffectRequest::parse_blink("ff0000:5", 54).is_err());
        assert!(EffectRequest::parse_blink("ff0000:00ff00:-1", 54).is_err());
        assert!(EffectRequest::parse_slow_blink("ff0000:0:10").is_err());
        assert!(EffectRequest::parse_slow_blink("1ff0000:2:10").is_err());
        assert!(EffectRequest::parse_slow_blink("green:2:10").is_err());
    }

    #[test]
    fn blink_alternates_and_respects_tick_gate() {
        let mut engine = EffectEngine::default();
        let t0 = Instant::now();
        let request = EffectRequest::parse_blink("ff0000:0000ff:10", 40).unwrap();
        engine.start(request, 0xFFFFFF, t0);

        let first = engine.tick(t0).unwrap();
        assert_eq!(packed(&first), (40, 0xFF0000));
        assert!(engine.tick(t0 + ms(200)).is_none());
        let second = engine.tick(t0 + ms(600)).unwrap();
        assert_eq!(packed(&second), (40, 0x0000FF));
        let third = engine.tick(t0 + ms(1200)).unwrap();
        assert_eq!(packed(&third), (40, 0xFF0000));
    }

    #[test]
    fn slow_blink_sweeps_towards_target() {
        let mut engine = EffectEngine::default();
        let t0 = Instant::now();
        let request = EffectRequest::parse_slow_blink("c86400:10:60").unwrap();
        engine.start(request, 0x000000, t0);

        assert_eq!(packed(&engine.tick(t0).unwrap()), (0, 0x000000));
        assert_eq!(packed(&engine.tick(t0 + ms(5000)).unwrap()), (50, 0x643200));
        assert_eq!(packed(&engine.tick(t0 + ms(10_000)).unwrap()), (100, 0xC86400));
        // next window started at t0 + 10s
        assert_eq!(packed(&engine.tick(t0 + ms(12_000)).unwrap()), (20, 0x281400));
    }

    #[test]
    fn slow_blink_hits_full_brightness_every_window() {
        let mut engine = EffectEngine::default();
        let t0 = Instant::now();
        engine.start(EffectRequest::parse_slow_blink("ffffff:10:60").unwrap(), 0, t0);

        let brightness: Vec<u8> = (0..=40)
            .map(|n| packed(&engine.tick(t0 + ms(500 * n)).unwrap()).0)
            .collect();
        assert_eq!(brightness.iter().filter(|b| **b == 100).count(), 2);
        assert_eq!(brightness[20], 100);
        assert_eq!(brightness[21], 5);
        assert_eq!(brightness[40], 100);
    }

    #[test]
    fn zero_brightness_byte_falls_back_to_default() {
        let request = EffectRequest::parse_blink("00ff0000:ff0000:5", 54).unwrap();
        let EffectRequest::Blink { first, second, .. } = request else {
            panic!("expected blink");
        };
        assert_eq!(first, second);
        assert_eq!(first, LightSetting { color: 0xFF0000, brightness: 54 });
    }

    #[test]
    fn effect_ends_with_light_off_then_goes_idle() {
        let mut engine = EffectEngine::default();
        let t0 = Instant::now();
        engine.start(EffectRequest::parse_blink("ff0000:00ff00:1", 50).unwrap(), 0, t0);
        assert!(engine.tick(t0).is_some());

        let off = engine.tick(t0 + ms(1500)).unwrap();
        assert_eq!(off.method, "toggle_light");
        assert_eq!(off.params, Some(json!(["off"])));
        assert!(!engine.is_active());
        assert!(engine.tick(t0 + ms(2500)).is_none());
    }

    #[test]
    fn new_effect_replaces_running_one() {
        let mut engine = EffectEngine::default();
        let t0 = Instant::now();
        engine.start(EffectRequest::parse_blink("ff0000:00ff00:1", 50).unwrap(), 0, t0);
        engine.tick(t0);
        engine.start(EffectRequest::parse_slow_blink("ffffff:4:30").unwrap(), 0, t0 + ms(100));

        // no leftover gate from the blink, and no early end
        let cmd = engine.tick(t0 + ms(100)).unwrap();
        assert_eq!(packed(&cmd), (0, 0x000000));
        assert!(engine.tick(t0 + ms(5000)).is_some());
        assert!(engine.is_active());
    }
}
