//! Synthetic camera: moving colour bars, no hardware required.

use super::{CameraError, CaptureDevice, DeviceOpener, RawFrame};

#[derive(Debug, Clone)]
pub struct TestPatternOpener {
    width: u32,
    height: u32,
}

impl TestPatternOpener {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for TestPatternOpener {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl DeviceOpener for TestPatternOpener {
    fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(TestPattern {
            width: self.width,
            height: self.height,
            tick: 0,
        }))
    }

    fn backend(&self) -> &'static str {
        "test-pattern"
    }
}

struct TestPattern {
    width: u32,
    height: u32,
    tick: u32,
}

const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

impl CaptureDevice for TestPattern {
    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgb = Vec::with_capacity(w * h * 3);
        for _y in 0..h {
            for x in 0..w {
                let bar = ((x + self.tick as usize) * BARS.len() / w.max(1)) % BARS.len();
                rgb.extend_from_slice(&BARS[bar]);
            }
        }
        self.tick = self.tick.wrapping_add(1);
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            rgb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_expected_size_and_move() {
        let mut dev = TestPatternOpener::new(14, 2).open(0).unwrap();
        let a = dev.read_frame().unwrap();
        let b = dev.read_frame().unwrap();
        assert_eq!(a.rgb.len(), 14 * 2 * 3);
        assert_ne!(a.rgb, b.rgb);
    }
}
