/*!
Diagnostic frame rendering.

When the machine halts (crash policy, unsupported board) the console keeps
presenting frames, so something has to be on them. This renders a red
screen with uppercase text from a tiny built-in 3x5 font, upscaled 2x to
6x10 on screen. Unknown characters render as an X-shaped placeholder.
*/

use crate::cores::{FRAME_BYTES, FRAME_HEIGHT, FRAME_WIDTH};

const BACKGROUND: [u8; 4] = [200, 0, 0, 255];
const FOREGROUND: [u8; 4] = [255, 255, 255, 255];

const GLYPH_WIDTH: usize = 3;
const GLYPH_HEIGHT: usize = 5;
const SCALE: usize = 2;
/// Horizontal advance per character, leaving a one-dot gap.
const ADVANCE: usize = GLYPH_WIDTH * SCALE + 1;

/// Fill the frame with the crash background and draw each `(text, x, y)`
/// line. Coordinates are top-left dot positions; text running off the
/// right edge is clipped.
pub fn render_crash_screen(frame: &mut Vec<u8>, lines: &[(&str, usize, usize)]) {
    if frame.len() != FRAME_BYTES {
        frame.resize(FRAME_BYTES, 0);
    }
    for px in frame.chunks_exact_mut(4) {
        px.copy_from_slice(&BACKGROUND);
    }
    for &(text, x, y) in lines {
        draw_text(frame, text, x, y);
    }
}

fn draw_text(frame: &mut [u8], text: &str, origin_x: usize, origin_y: usize) {
    for (i, c) in text.chars().enumerate() {
        let base_x = origin_x + i * ADVANCE;
        if base_x + GLYPH_WIDTH * SCALE > FRAME_WIDTH {
            break;
        }
        for dy in 0..GLYPH_HEIGHT * SCALE {
            let y = origin_y + dy;
            if y >= FRAME_HEIGHT {
                break;
            }
            for dx in 0..GLYPH_WIDTH * SCALE {
                if glyph_pixel(c, dx / SCALE, dy / SCALE) {
                    let o = (y * FRAME_WIDTH + base_x + dx) * 4;
                    frame[o..o + 4].copy_from_slice(&FOREGROUND);
                }
            }
        }
    }
}

/// 3x5 glyph lookup; rows top to bottom, bit 2 is the left column.
fn glyph_pixel(c: char, x: usize, y: usize) -> bool {
    let rows: [u8; 5] = match c.to_ascii_uppercase() {
        ' ' => [0b000, 0b000, 0b000, 0b000, 0b000],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b110, 0b001, 0b010, 0b100, 0b111],
        '3' => [0b110, 0b001, 0b010, 0b001, 0b110],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b110, 0b001, 0b110],
        '6' => [0b011, 0b100, 0b110, 0b101, 0b010],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b010, 0b101, 0b010, 0b101, 0b010],
        '9' => [0b010, 0b101, 0b011, 0b001, 0b110],
        // Placeholder for anything else.
        _ => return x == y % GLYPH_WIDTH || x == GLYPH_WIDTH - 1 - y % GLYPH_WIDTH,
    };
    rows[y] & (1 << (GLYPH_WIDTH - 1 - x)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(frame: &[u8], x: usize, y: usize) -> [u8; 4] {
        let o = (y * FRAME_WIDTH + x) * 4;
        [frame[o], frame[o + 1], frame[o + 2], frame[o + 3]]
    }

    #[test]
    fn background_fills_the_whole_frame() {
        let mut frame = Vec::new();
        render_crash_screen(&mut frame, &[]);
        assert_eq!(frame.len(), FRAME_BYTES);
        assert_eq!(pixel(&frame, 0, 0), BACKGROUND);
        assert_eq!(pixel(&frame, FRAME_WIDTH - 1, FRAME_HEIGHT - 1), BACKGROUND);
    }

    #[test]
    fn text_paints_foreground_dots_at_the_origin() {
        let mut frame = Vec::new();
        render_crash_screen(&mut frame, &[("T", 8, 8)]);
        // Top row of T is fully lit (3 glyph dots * 2x scale).
        for dx in 0..6 {
            assert_eq!(pixel(&frame, 8 + dx, 8), FOREGROUND);
        }
        // Below the glyph stays background.
        assert_eq!(pixel(&frame, 8, 8 + 10), BACKGROUND);
    }

    #[test]
    fn long_lines_clip_instead_of_wrapping() {
        let mut frame = Vec::new();
        let long = "X".repeat(80);
        render_crash_screen(&mut frame, &[(&long, 0, 0)]);
        assert_eq!(frame.len(), FRAME_BYTES);
        // First dots of the second row are untouched by clipped glyphs.
        assert_eq!(pixel(&frame, 0, 20), BACKGROUND);
    }

    #[test]
    fn lowercase_maps_onto_uppercase_glyphs() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        render_crash_screen(&mut a, &[("crash", 8, 8)]);
        render_crash_screen(&mut b, &[("CRASH", 8, 8)]);
        assert_eq!(a, b);
    }
}
