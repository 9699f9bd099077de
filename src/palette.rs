/// Stable categorical colour sequence shared by every view.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#3366CC", "#DC3912", "#FF9900", "#109618", "#990099", "#0099C6", "#DD4477", "#66AA00",
    "#B82E2E", "#316395",
];

/// Returned when no palette colour can be picked.
pub const FALLBACK_COLOR: &str = "#808080";

/// Colour of the sunburst centre.
pub const ROOT_COLOR: &str = "#FFFFFF";

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<String>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect())
    }
}

impl Palette {
    pub fn new(colors: Vec<String>) -> Self {
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// `palette[index mod len]`, or the fallback for an empty palette.
    pub fn color(&self, index: usize) -> &str {
        if self.colors.is_empty() {
            return FALLBACK_COLOR;
        }
        &self.colors[index % self.colors.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_wraps() {
        let palette = Palette::default();
        assert_eq!(palette.color(0), "#3366CC");
        assert_eq!(palette.color(10), "#3366CC");
        assert_eq!(palette.color(13), "#109618");
    }

    #[test]
    fn test_empty_palette_falls_back() {
        assert_eq!(Palette::new(vec![]).color(3), FALLBACK_COLOR);
    }
}
