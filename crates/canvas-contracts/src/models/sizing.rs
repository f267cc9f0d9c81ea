pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Sizes the OpenAI generation endpoint accepts for the canvas models.
pub const OPENAI_PRESET_SIZES: [&str; 4] = ["1024x1024", "512x512", "1024x1792", "1792x1024"];

/// Maps a canvas resolution onto an accepted OpenAI size. Matching is exact:
/// anything that is not one of the presets falls back to `1024x1024`.
pub fn openai_preset_size(resolution: &str) -> &'static str {
    OPENAI_PRESET_SIZES
        .iter()
        .find(|size| **size == resolution)
        .copied()
        .unwrap_or(DEFAULT_IMAGE_SIZE)
}

/// Splits `WIDTHxHEIGHT` into positive dimensions.
pub fn parse_dimensions(resolution: &str) -> Option<(u32, u32)> {
    let normalized = resolution.trim().to_ascii_lowercase();
    let (left, right) = normalized.split_once('x')?;
    let width = left.trim().parse::<u32>().ok()?;
    let height = right.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_sizes_pass_through() {
        for size in OPENAI_PRESET_SIZES {
            assert_eq!(openai_preset_size(size), size);
        }
    }

    #[test]
    fn unrecognized_resolutions_default_to_square() {
        for raw in [
            "",
            "256x256",
            "1536x1024",
            "wide",
            "1024 x 1024 px",
            "512X512",
            " 1792x1024 ",
        ] {
            assert_eq!(openai_preset_size(raw), "1024x1024", "input {raw:?}");
        }
    }

    #[test]
    fn parse_dimensions_handles_valid_and_invalid_input() {
        assert_eq!(parse_dimensions("1024x1792"), Some((1024, 1792)));
        assert_eq!(parse_dimensions(" 512 X 512 "), Some((512, 512)));
        assert_eq!(parse_dimensions("0x512"), None);
        assert_eq!(parse_dimensions("512"), None);
        assert_eq!(parse_dimensions("axb"), None);
    }
}
