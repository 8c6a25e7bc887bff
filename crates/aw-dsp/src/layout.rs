//! Speaker layouts and ambisonic panning coefficients

use thiserror::Error;

/// Channel identity within an input file's channel map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    RearLeft,
    RearRight,
    SideLeft,
    SideRight,
    TopFrontLeft,
    TopFrontRight,
    TopRearLeft,
    TopRearRight,
    /// B-format omnidirectional (pressure) channel.
    AmbiW,
    /// B-format front-back channel.
    AmbiX,
    /// B-format left-right channel.
    AmbiY,
    /// B-format up-down channel.
    AmbiZ,
    /// A position this encoder has no use for.
    Invalid,
}

/// A virtual speaker position. Azimuth is counter-clockwise, 0 = front,
/// positive = left.
#[derive(Debug, Clone, Copy)]
pub struct SpeakerPos {
    pub channel: ChannelId,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
}

const fn spk(channel: ChannelId, azimuth_deg: f32, elevation_deg: f32) -> SpeakerPos {
    SpeakerPos { channel, azimuth_deg, elevation_deg }
}

use ChannelId::*;

pub const STEREO_MAP: [SpeakerPos; 2] = [
    spk(FrontLeft, 30.0, 0.0),
    spk(FrontRight, -30.0, 0.0),
];

pub const QUAD_MAP: [SpeakerPos; 4] = [
    spk(FrontLeft, 45.0, 0.0),
    spk(FrontRight, -45.0, 0.0),
    spk(RearLeft, 135.0, 0.0),
    spk(RearRight, -135.0, 0.0),
];

pub const X51_MAP: [SpeakerPos; 6] = [
    spk(FrontLeft, 30.0, 0.0),
    spk(FrontRight, -30.0, 0.0),
    spk(FrontCenter, 0.0, 0.0),
    spk(Lfe, 0.0, 0.0),
    spk(SideLeft, 110.0, 0.0),
    spk(SideRight, -110.0, 0.0),
];

pub const X51_REAR_MAP: [SpeakerPos; 6] = [
    spk(FrontLeft, 30.0, 0.0),
    spk(FrontRight, -30.0, 0.0),
    spk(FrontCenter, 0.0, 0.0),
    spk(Lfe, 0.0, 0.0),
    spk(RearLeft, 110.0, 0.0),
    spk(RearRight, -110.0, 0.0),
];

pub const X71_MAP: [SpeakerPos; 8] = [
    spk(FrontLeft, 30.0, 0.0),
    spk(FrontRight, -30.0, 0.0),
    spk(FrontCenter, 0.0, 0.0),
    spk(Lfe, 0.0, 0.0),
    spk(RearLeft, 150.0, 0.0),
    spk(RearRight, -150.0, 0.0),
    spk(SideLeft, 90.0, 0.0),
    spk(SideRight, -90.0, 0.0),
];

pub const X714_MAP: [SpeakerPos; 12] = [
    spk(FrontLeft, 30.0, 0.0),
    spk(FrontRight, -30.0, 0.0),
    spk(FrontCenter, 0.0, 0.0),
    spk(Lfe, 0.0, 0.0),
    spk(RearLeft, 150.0, 0.0),
    spk(RearRight, -150.0, 0.0),
    spk(SideLeft, 90.0, 0.0),
    spk(SideRight, -90.0, 0.0),
    spk(TopFrontLeft, 45.0, 35.0),
    spk(TopFrontRight, -45.0, 35.0),
    spk(TopRearLeft, 135.0, 35.0),
    spk(TopRearRight, -135.0, 35.0),
];

/// First-order ambisonic coefficients for a direction, +3dB of FuMa.
pub fn ambi_coeffs(azimuth: f32, elevation: f32) -> [f32; 4] {
    use std::f32::consts::SQRT_2;
    let x = azimuth.cos() * elevation.cos();
    let y = azimuth.sin() * elevation.cos();
    let z = elevation.sin();
    [1.0, SQRT_2 * x, SQRT_2 * y, SQRT_2 * z]
}

/// How an input file maps onto the ambisonic intermediate.
#[derive(Debug, Clone, Copy)]
pub enum InputLayout {
    /// Channels feed virtual speakers that get panned into B-format.
    Speakers(&'static [SpeakerPos]),
    /// The input already is B-format (WXY or WXYZ).
    BFormat { channels: usize },
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("{0}-channel map not supported ({1:?})")]
    UnsupportedMap(usize, Vec<ChannelId>),
    #[error("unmapped {0}-channel audio not supported")]
    UnsupportedChannelCount(usize),
}

const AMBI_2D_MAP: [ChannelId; 3] = [AmbiW, AmbiX, AmbiY];
const AMBI_3D_MAP: [ChannelId; 4] = [AmbiW, AmbiX, AmbiY, AmbiZ];

fn matches(map: &[ChannelId], positions: &[SpeakerPos]) -> bool {
    map.len() == positions.len()
        && map.iter().zip(positions).all(|(id, pos)| *id == pos.channel)
}

/// Determine the layout from an explicit channel map.
pub fn layout_from_map(map: &[ChannelId]) -> Result<InputLayout, LayoutError> {
    if matches(map, &STEREO_MAP) {
        Ok(InputLayout::Speakers(&STEREO_MAP))
    } else if matches(map, &QUAD_MAP) {
        Ok(InputLayout::Speakers(&QUAD_MAP))
    } else if matches(map, &X51_MAP) {
        Ok(InputLayout::Speakers(&X51_MAP))
    } else if matches(map, &X51_REAR_MAP) {
        Ok(InputLayout::Speakers(&X51_REAR_MAP))
    } else if matches(map, &X71_MAP) {
        Ok(InputLayout::Speakers(&X71_MAP))
    } else if matches(map, &X714_MAP) {
        Ok(InputLayout::Speakers(&X714_MAP))
    } else if map == AMBI_2D_MAP.as_slice() || map == AMBI_3D_MAP.as_slice() {
        Ok(InputLayout::BFormat { channels: map.len() })
    } else {
        Err(LayoutError::UnsupportedMap(map.len(), map.to_vec()))
    }
}

/// Fall back to assuming WFX channel ordering when no map is present.
pub fn layout_from_channel_count(channels: usize) -> Result<InputLayout, LayoutError> {
    match channels {
        2 => Ok(InputLayout::Speakers(&STEREO_MAP)),
        6 => Ok(InputLayout::Speakers(&X51_MAP)),
        8 => Ok(InputLayout::Speakers(&X71_MAP)),
        n => Err(LayoutError::UnsupportedChannelCount(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_coeffs() {
        let coeffs = ambi_coeffs(0.0, 0.0);
        assert!((coeffs[0] - 1.0).abs() < 1e-6);
        assert!((coeffs[1] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!(coeffs[2].abs() < 1e-6);
        assert!(coeffs[3].abs() < 1e-6);
    }

    #[test]
    fn test_left_coeffs() {
        let coeffs = ambi_coeffs(90.0f32.to_radians(), 0.0);
        assert!(coeffs[1].abs() < 1e-6);
        assert!((coeffs[2] - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_layout_from_map() {
        assert!(matches!(
            layout_from_map(&[FrontLeft, FrontRight]),
            Ok(InputLayout::Speakers(map)) if map.len() == 2
        ));
        assert!(matches!(
            layout_from_map(&[FrontLeft, FrontRight, FrontCenter, Lfe, RearLeft, RearRight]),
            Ok(InputLayout::Speakers(map)) if map[4].channel == RearLeft
        ));
        assert!(matches!(
            layout_from_map(&[AmbiW, AmbiX, AmbiY, AmbiZ]),
            Ok(InputLayout::BFormat { channels: 4 })
        ));
        // Order matters; a swapped stereo pair is not stereo.
        assert!(layout_from_map(&[FrontRight, FrontLeft]).is_err());
    }

    #[test]
    fn test_layout_fallback() {
        assert!(matches!(
            layout_from_channel_count(2),
            Ok(InputLayout::Speakers(map)) if map.len() == 2
        ));
        assert!(matches!(
            layout_from_channel_count(8),
            Ok(InputLayout::Speakers(map)) if map.len() == 8
        ));
        assert!(layout_from_channel_count(3).is_err());
        assert!(layout_from_channel_count(12).is_err());
    }
}
