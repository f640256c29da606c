use image::{
    imageops::{self, FilterType},
    DynamicImage, Rgba, RgbaImage, RgbImage,
};

use crate::analysis::OverlayImage;

/// Transparent surface laid over the live video. Each render fully replaces
/// the previous content; there is no blending between successive overlays.
pub struct OverlayRenderer {
    surface: RgbaImage,
    frames_rendered: u64,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            frames_rendered: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Resizes the surface to the video. A resize blanks it.
    pub fn align_to(&mut self, video_dimensions: (u32, u32)) {
        if self.surface.dimensions() != video_dimensions {
            let (width, height) = video_dimensions;
            self.surface = RgbaImage::new(width, height);
        }
    }

    pub fn render(&mut self, overlay: &OverlayImage, video_dimensions: (u32, u32)) {
        self.align_to(video_dimensions);
        let (width, height) = self.surface.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let source = overlay.image();
        self.surface = if source.dimensions() == (width, height) {
            source.clone()
        } else {
            imageops::resize(source, width, height, FilterType::Triangle)
        };
        self.frames_rendered += 1;
    }

    pub fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn is_blank(&self) -> bool {
        self.surface.pixels().all(|pixel| pixel[3] == 0)
    }

    /// Alpha-blends the surface over a live frame.
    pub fn composite(&self, frame: &RgbImage) -> RgbaImage {
        let mut out = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        let (width, height) = out.dimensions();
        if self.surface.width() == 0 || self.surface.height() == 0 {
            return out;
        }

        if self.surface.dimensions() == (width, height) {
            imageops::overlay(&mut out, &self.surface, 0, 0);
        } else {
            let scaled = imageops::resize(&self.surface, width, height, FilterType::Triangle);
            imageops::overlay(&mut out, &scaled, 0, 0);
        }
        out
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}
