//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing an output config that runs at the source sample rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly `sample_rate`.
///
/// Among ranges that support the rate, prefers an exact channel match, then more
/// channels over fewer, then the better sample format. Fails when the device cannot
/// run at the rate at all.
pub fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<((u8, u8), cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if sample_rate < range.min_sample_rate() || sample_rate > range.max_sample_rate() {
            continue;
        }
        let rank = (
            channel_rank(range.channels(), channels),
            sample_format_rank(range.sample_format()),
        );
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank < *best_rank,
        };
        if replace {
            best = Some((rank, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(sample_rate))
        .ok_or_else(|| anyhow!("Output device does not support {sample_rate} Hz"))
}

/// Lightweight output device metadata for CLI listing.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
}

/// Return device metadata for every output device of the host.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.to_string();
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if min_rate > max_rate {
            match d.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = min_rate;
                }
                Err(e) => {
                    tracing::warn!(device = %name, "skipping device without output config: {e}");
                    continue;
                }
            }
        }
        out.push(DeviceInfo {
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn channel_rank(available: u16, wanted: u16) -> u8 {
    if available == wanted {
        0
    } else if available > wanted {
        1
    } else {
        2
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn channel_rank_prefers_exact_then_wider() {
        assert!(channel_rank(2, 2) < channel_rank(6, 2));
        assert!(channel_rank(6, 2) < channel_rank(1, 2));
    }

    #[test]
    fn sample_format_rank_prefers_float() {
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::I16));
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::U8));
    }
}
