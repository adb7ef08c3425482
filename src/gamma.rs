// Gamma-correct mixing of the overlay color into the camera image, with
// table lookups instead of powf per pixel.
// Visual: the purple tint keeps the skin/hair texture visible underneath,
// without the muddy dark fringe a plain sRGB mix gives.

pub struct GammaLut {
    // sRGB(0..255) -> linear (0..1) as f32
    srgb_to_linear: [f32; 256],
    // linear(0..1) -> sRGB(0..255) via 4096-step quantization
    // (index = (linear * 4095).round())
    linear_to_srgb: [u8; 4096],
}

impl GammaLut {
    /// Build both tables once at startup.
    pub fn new() -> Self {
        let mut s2l = [0.0f32; 256];
        for (v, slot) in s2l.iter_mut().enumerate() {
            let c = v as f32 / 255.0;
            *slot = if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) };
        }

        let mut l2s = [0u8; 4096];
        for (i, slot) in l2s.iter_mut().enumerate() {
            let l = (i as f32) / 4095.0;
            let s = if l <= 0.003_130_8 { 12.92 * l } else { 1.055 * l.powf(1.0 / 2.4) - 0.055 };
            *slot = (s * 255.0).round().clamp(0.0, 255.0) as u8;
        }

        Self { srgb_to_linear: s2l, linear_to_srgb: l2s }
    }

    #[inline]
    pub fn srgb_u8_to_linear(&self, v: u8) -> f32 {
        self.srgb_to_linear[v as usize]
    }

    #[inline]
    pub fn linear_to_srgb_u8(&self, l: f32) -> u8 {
        let idx = (l.clamp(0.0, 1.0) * 4095.0).round() as usize;
        self.linear_to_srgb[idx]
    }

    /// Mix one channel: `a` of `over` on top of `base`, in linear light.
    #[inline]
    pub fn mix(&self, base: u8, over: u8, a: f32) -> u8 {
        if a <= 0.0 { return base; }
        if a >= 1.0 { return over; }
        let l = a * self.srgb_u8_to_linear(over) + (1.0 - a) * self.srgb_u8_to_linear(base);
        self.linear_to_srgb_u8(l)
    }
}

impl Default for GammaLut {
    fn default() -> Self {
        Self::new()
    }
}
