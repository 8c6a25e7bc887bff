//! Per-object proxies
//!
//! A node proxy tracks one sink or source node, extracting its preferred
//! sample rate and channel layout from format-enumeration parameters. The
//! metadata proxy watches the `default` metadata object for the default
//! sink/source device names. Proxies unsubscribe from the server when
//! dropped.

use std::sync::Arc;

use crate::event_manager::{DeviceDirectory, DeviceNode, AUDIO_SINK_CLASS, AUDIO_SOURCE_CLASS};
use crate::server::{
    keys, Choice, CoreHandle, FormatPod, FormatProp, ObjectId, PodValue, Props, ID_CORE,
};
use crate::{DeviceChannels, MAX_OUTPUT_RATE, MIN_OUTPUT_RATE};

pub(crate) struct NodeProxy {
    id: ObjectId,
    core: Arc<dyn CoreHandle>,
}

impl NodeProxy {
    pub(crate) fn new(id: ObjectId, core: Arc<dyn CoreHandle>) -> Self {
        Self { id, core }
    }

    /// Property change on the node: media class, name and description.
    pub(crate) fn info(&mut self, dir: &mut DeviceDirectory, props: &Props) {
        let Some(media_class) = props.get(keys::MEDIA_CLASS) else {
            return;
        };

        let is_capture = if media_class.eq_ignore_ascii_case(AUDIO_SINK_CLASS) {
            false
        } else if media_class.eq_ignore_ascii_case(AUDIO_SOURCE_CLASS) {
            true
        } else {
            log::debug!(
                "Dropping device node {} which became type \"{}\"",
                self.id,
                media_class
            );
            dir.remove(self.id);
            return;
        };

        let is_headphones = props
            .get(keys::DEVICE_FORM_FACTOR)
            .map(|form| {
                form.eq_ignore_ascii_case("headphones") || form.eq_ignore_ascii_case("headset")
            })
            .unwrap_or(false);

        let dev_name = props.get(keys::NODE_NAME).unwrap_or("");
        let node_name = [keys::NODE_DESCRIPTION, keys::NODE_NICK, keys::NODE_NAME]
            .into_iter()
            .filter_map(|key| props.get(key))
            .find(|value| !value.is_empty());

        log::debug!(
            "Got {} device \"{}\"{} = ID {}",
            if is_capture { "capture" } else { "playback" },
            dev_name,
            if is_headphones { " (headphones)" } else { "" },
            self.id
        );

        let node = dir.add(self.id);
        node.name = match node_name {
            Some(name) => name.to_string(),
            None => format!("node #{}", self.id),
        };
        node.dev_name = dev_name.to_string();
        node.is_capture = is_capture;
        node.is_headphones = is_headphones;
    }

    /// Format-enumeration parameter on the node.
    pub(crate) fn param(&mut self, dir: &mut DeviceDirectory, param: &FormatPod) {
        let Some(node) = dir.find_mut(self.id) else {
            return;
        };

        if let Some(value) = param.find(FormatProp::Rate) {
            parse_sample_rate(node, value);
        }
        if let Some(value) = param.find(FormatProp::Position) {
            parse_positions(node, value);
        } else if let Some(value) = param.find(FormatProp::Channels) {
            parse_channel_count(node, value);
        }
    }
}

impl Drop for NodeProxy {
    fn drop(&mut self) {
        self.core.unbind(self.id);
    }
}

fn in_rate_range(rate: i32) -> bool {
    rate >= MIN_OUTPUT_RATE as i32 && rate <= MAX_OUTPUT_RATE as i32
}

pub(crate) fn parse_sample_rate(node: &mut DeviceNode, value: &PodValue) {
    let Some(choice) = value.as_int() else {
        log::warn!("Unhandled sample rate value type: {:?}", value);
        return;
    };

    match choice {
        Choice::Range { default, min, max } => {
            log::debug!(
                "Device ID {} sample rate: {} (range: {} -> {})",
                node.id,
                default,
                min,
                max
            );
            node.sample_rate =
                (*default).clamp(MIN_OUTPUT_RATE as i32, MAX_OUTPUT_RATE as i32) as u32;
        }
        Choice::Enum { default, alternatives } => {
            log::debug!(
                "Device ID {} sample rate: {} ({:?})",
                node.id,
                default,
                alternatives
            );
            // Pick the first listed rate in the allowed range, the default
            // if possible.
            for &rate in std::iter::once(default).chain(alternatives) {
                if in_rate_range(rate) {
                    node.sample_rate = rate as u32;
                    break;
                }
            }
        }
        Choice::None(rate) => {
            log::debug!("Device ID {} sample rate: {}", node.id, rate);
            node.sample_rate = (*rate).clamp(MIN_OUTPUT_RATE as i32, MAX_OUTPUT_RATE as i32) as u32;
        }
    }
}

/// True when every channel in `template` exists in `map` (map is equal to
/// or a superset of the template).
fn match_channel_map(map: &[u32], template: &[crate::server::ChannelPosition]) -> bool {
    template.iter().all(|ch| map.contains(&ch.id()))
}

pub(crate) fn parse_positions(node: &mut DeviceNode, value: &PodValue) {
    use crate::device::{
        QUAD_POSITIONS, STEREO_POSITIONS, X51_POSITIONS, X51_REAR_POSITIONS, X61_POSITIONS,
        X71_POSITIONS,
    };

    let Some(chanmap) = value.as_id_array() else {
        return;
    };
    let got = chanmap.len();
    if got == 0 {
        return;
    }

    node.channels = Some(if got >= 8 && match_channel_map(chanmap, &X71_POSITIONS) {
        DeviceChannels::X71
    } else if got >= 7 && match_channel_map(chanmap, &X61_POSITIONS) {
        DeviceChannels::X61
    } else if got >= 6 && match_channel_map(chanmap, &X51_POSITIONS) {
        DeviceChannels::X51
    } else if got >= 6 && match_channel_map(chanmap, &X51_REAR_POSITIONS) {
        DeviceChannels::X51
    } else if got >= 4 && match_channel_map(chanmap, &QUAD_POSITIONS) {
        DeviceChannels::Quad
    } else if got >= 2 && match_channel_map(chanmap, &STEREO_POSITIONS) {
        DeviceChannels::Stereo
    } else {
        DeviceChannels::Mono
    });
    log::debug!(
        "Device ID {} got {} position{} for {:?}",
        node.id,
        got,
        if got == 1 { "" } else { "s" },
        node.channels
    );
}

/// Fallback when only a channel count is published.
pub(crate) fn parse_channel_count(node: &mut DeviceNode, value: &PodValue) {
    let Some(choice) = value.as_int() else {
        return;
    };
    let count = choice.default_value();
    if count >= 2 {
        node.channels = Some(DeviceChannels::Stereo);
    } else if count >= 1 {
        node.channels = Some(DeviceChannels::Mono);
    }
    log::debug!(
        "Device ID {} got {} channel{} for {:?}",
        node.id,
        count,
        if count == 1 { "" } else { "s" },
        node.channels
    );
}

pub(crate) struct MetadataProxy {
    id: ObjectId,
    core: Arc<dyn CoreHandle>,
}

impl MetadataProxy {
    pub(crate) fn new(id: ObjectId, core: Arc<dyn CoreHandle>) -> Self {
        Self { id, core }
    }

    pub(crate) fn property(
        &mut self,
        dir: &mut DeviceDirectory,
        subject: ObjectId,
        key: &str,
        value_type: Option<&str>,
        value: Option<&str>,
    ) {
        if subject != ID_CORE {
            return;
        }

        let is_capture = match key {
            "default.audio.sink" => false,
            "default.audio.source" => true,
            _ => return,
        };

        let target = if is_capture {
            &mut dir.default_source_dev
        } else {
            &mut dir.default_sink_dev
        };

        let Some(value_type) = value_type else {
            log::debug!(
                "Default {} device cleared",
                if is_capture { "capture" } else { "playback" }
            );
            target.clear();
            return;
        };
        if value_type != "Spa:String:JSON" {
            log::error!("Unexpected {} property type: {}", key, value_type);
            return;
        }
        let Some(raw) = value else {
            target.clear();
            return;
        };

        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) else {
            return;
        };
        if let Some(name) = parsed.get("name").and_then(|n| n.as_str()) {
            log::debug!(
                "Got default {} device \"{}\"",
                if is_capture { "capture" } else { "playback" },
                name
            );
            *target = name.to_string();
        }
    }
}

impl Drop for MetadataProxy {
    fn drop(&mut self) {
        self.core.unbind(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> DeviceNode {
        DeviceNode {
            name: String::new(),
            dev_name: String::new(),
            id: 7,
            is_capture: false,
            is_headphones: false,
            sample_rate: 0,
            channels: None,
        }
    }

    #[test]
    fn test_rate_range_clamps_default() {
        let mut node = test_node();
        parse_sample_rate(
            &mut node,
            &PodValue::Int(Choice::Range { default: 384_000, min: 8_000, max: 384_000 }),
        );
        assert_eq!(node.sample_rate, MAX_OUTPUT_RATE);

        parse_sample_rate(
            &mut node,
            &PodValue::Int(Choice::Range { default: 44_100, min: 8_000, max: 192_000 }),
        );
        assert_eq!(node.sample_rate, 44_100);
    }

    #[test]
    fn test_rate_enum_prefers_default_then_first_valid() {
        let mut node = test_node();
        parse_sample_rate(
            &mut node,
            &PodValue::Int(Choice::Enum { default: 48_000, alternatives: vec![44_100, 96_000] }),
        );
        assert_eq!(node.sample_rate, 48_000);

        parse_sample_rate(
            &mut node,
            &PodValue::Int(Choice::Enum {
                default: 1_000_000,
                alternatives: vec![500_000, 96_000, 44_100],
            }),
        );
        assert_eq!(node.sample_rate, 96_000);
    }

    #[test]
    fn test_rate_single_value() {
        let mut node = test_node();
        parse_sample_rate(&mut node, &PodValue::Int(Choice::None(4_000)));
        assert_eq!(node.sample_rate, MIN_OUTPUT_RATE);
    }

    #[test]
    fn test_positions_match_largest_first() {
        use crate::server::ChannelPosition::*;

        let mut node = test_node();

        // A full 7.1 set matches 7.1 even though 5.1 is a subset of it.
        let x71: Vec<u32> = [
            FrontLeft, FrontRight, FrontCenter, Lfe, RearLeft, RearRight, SideLeft, SideRight,
        ]
        .iter()
        .map(|c| c.id())
        .collect();
        parse_positions(&mut node, &PodValue::IdArray(x71));
        assert_eq!(node.channels, Some(DeviceChannels::X71));

        // 5.1 with rear surrounds still reports as 5.1.
        let x51rear: Vec<u32> = [FrontLeft, FrontRight, FrontCenter, Lfe, RearLeft, RearRight]
            .iter()
            .map(|c| c.id())
            .collect();
        parse_positions(&mut node, &PodValue::IdArray(x51rear));
        assert_eq!(node.channels, Some(DeviceChannels::X51));

        // Unrecognized single position falls back to mono.
        parse_positions(&mut node, &PodValue::IdArray(vec![RearCenter.id()]));
        assert_eq!(node.channels, Some(DeviceChannels::Mono));
    }

    #[test]
    fn test_channel_count_fallback() {
        let mut node = test_node();
        parse_channel_count(&mut node, &PodValue::Int(Choice::None(6)));
        assert_eq!(node.channels, Some(DeviceChannels::Stereo));
        parse_channel_count(&mut node, &PodValue::Int(Choice::None(1)));
        assert_eq!(node.channels, Some(DeviceChannels::Mono));
    }
}
