//! Spectrogram heat map widget.
//!
//! Time runs along the x axis with the newest row at the right edge; frequency
//! runs up the y axis. Each terminal cell shows two pixels using the upper half
//! block, so the vertical resolution is twice the widget height.

use ratatui::{buffer::Buffer, layout::Rect, style::Color, widgets::Widget};

use crate::spectrogram::buffer::SpectrogramBuffer;

/// Viridis control points, from 0.0 to 1.0 in equal steps.
const VIRIDIS: [(u8, u8, u8); 6] = [
    (68, 1, 84),
    (65, 68, 135),
    (42, 120, 142),
    (34, 168, 132),
    (122, 209, 81),
    (253, 231, 37),
];

/// Maps a level in [0, 1] onto the viridis colormap.
pub fn viridis(level: f32) -> Color {
    let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
    let scaled = level * (VIRIDIS.len() - 1) as f32;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let t = scaled - lower as f32;

    let (r0, g0, b0) = VIRIDIS[lower];
    let (r1, g1, b1) = VIRIDIS[lower + 1];
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Color::Rgb(mix(r0, r1), mix(g0, g1), mix(b0, b1))
}

/// Reduces `row` to `pixels` values by taking the maximum of each bin group.
///
/// Index 0 of the result is the lowest frequency. When there are more pixels
/// than bins, bins are repeated.
pub fn pool_bins(row: &[f32], pixels: usize) -> Vec<f32> {
    if row.is_empty() || pixels == 0 {
        return vec![0.0; pixels];
    }

    (0..pixels)
        .map(|pixel| {
            let start = pixel * row.len() / pixels;
            let end = ((pixel + 1) * row.len() / pixels).max(start + 1).min(row.len());
            row[start..end].iter().copied().fold(0.0, f32::max)
        })
        .collect()
}

/// Pixel columns ready to draw, oldest first.
pub struct Heatmap {
    columns: Vec<Vec<f32>>,
}

impl Heatmap {
    /// Samples the most recent rows of `buffer` that fit into `area`.
    ///
    /// Bins above `max_bin` are left out so the display can zoom on the low end.
    pub fn from_buffer(buffer: &SpectrogramBuffer, area: Rect, max_bin: Option<usize>) -> Self {
        let visible = (area.width as usize).min(buffer.depth());
        let pixels = area.height as usize * 2;

        let columns = (0..visible)
            .rev()
            .filter_map(|age| buffer.row(age))
            .map(|row| {
                let end = max_bin.map_or(row.len(), |bin| (bin + 1).min(row.len()));
                pool_bins(&row[..end], pixels)
            })
            .collect();

        Self { columns }
    }
}

impl Widget for Heatmap {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let height = area.height as usize;
        let offset = (area.width as usize).saturating_sub(self.columns.len());

        for x in area.left()..area.right() {
            for y in area.top()..area.bottom() {
                buf[(x, y)].set_char(' ').set_bg(Color::Black);
            }
        }

        for (index, column) in self.columns.iter().enumerate() {
            let x = area.x + (offset + index) as u16;
            for cell_row in 0..height {
                // Terminal rows grow downwards; pixel 0 is the bottom.
                let lower_pixel = (height - 1 - cell_row) * 2;
                let lower = column.get(lower_pixel).copied().unwrap_or(0.0);
                let upper = column.get(lower_pixel + 1).copied().unwrap_or(0.0);
                let y = area.y + cell_row as u16;
                buf[(x, y)]
                    .set_char('▀')
                    .set_fg(viridis(upper))
                    .set_bg(viridis(lower));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrogram::normalizer::NormalizedRow;

    #[test]
    fn test_viridis_endpoints() {
        assert_eq!(viridis(0.0), Color::Rgb(68, 1, 84));
        assert_eq!(viridis(1.0), Color::Rgb(253, 231, 37));
        assert_eq!(viridis(-3.0), viridis(0.0));
        assert_eq!(viridis(f32::NAN), viridis(0.0));
    }

    #[test]
    fn test_pool_bins_takes_group_maximum() {
        let row = [0.1, 0.9, 0.2, 0.3, 0.0, 0.4];
        assert_eq!(pool_bins(&row, 3), vec![0.9, 0.3, 0.4]);
        assert_eq!(pool_bins(&row, 12).len(), 12);
        assert_eq!(pool_bins(&[], 4), vec![0.0; 4]);
    }

    #[test]
    fn test_newest_row_is_drawn_at_right_edge() {
        let mut buffer = SpectrogramBuffer::new(3, 4);
        buffer.push(&NormalizedRow::from(vec![1.0; 4]));
        let area = Rect::new(0, 0, 5, 1);

        let mut canvas = Buffer::empty(area);
        Heatmap::from_buffer(&buffer, area, None).render(area, &mut canvas);

        let right = &canvas[(4, 0)];
        assert_eq!(right.symbol(), "▀");
        assert_eq!(right.fg, viridis(1.0));
        assert_eq!(right.bg, viridis(1.0));

        let older = &canvas[(3, 0)];
        assert_eq!(older.fg, viridis(0.0));
        assert_eq!(canvas[(0, 0)].symbol(), " ");
    }

    #[test]
    fn test_low_frequencies_at_bottom() {
        let mut buffer = SpectrogramBuffer::new(1, 4);
        buffer.push(&NormalizedRow::from(vec![1.0, 1.0, 0.0, 0.0]));
        let area = Rect::new(0, 0, 1, 2);

        let mut canvas = Buffer::empty(area);
        Heatmap::from_buffer(&buffer, area, None).render(area, &mut canvas);

        assert_eq!(canvas[(0, 1)].bg, viridis(1.0));
        assert_eq!(canvas[(0, 0)].fg, viridis(0.0));
    }
}
