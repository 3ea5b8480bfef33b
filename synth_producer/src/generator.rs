//! Sample sources
//!
//! [`SampleSource`] is where a real renderer plugs in. The bundled
//! [`NoiseSource`] draws random sizes and captions and fills the image with
//! either a gradient or uniform noise; it exists to drive the ring, not to
//! produce meaningful pictures.

use crate::config::GeneratorConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};
use synth_ring::{Sample, ShmResult};

/// Produces the samples a producer publishes.
pub trait SampleSource: Send {
    /// Next sample to publish.
    fn next_sample(&mut self) -> ShmResult<Sample>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Seed that differs between producers started in the same second.
pub fn seed_from_clock() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ u64::from(std::process::id()).rotate_left(32)
}

/// Random gradients and noise with random captions.
pub struct NoiseSource {
    config: GeneratorConfig,
    alphabet: Vec<char>,
    rng: StdRng,
}

impl NoiseSource {
    /// Generator for a validated config.
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        let alphabet = config.alphabet.chars().collect();
        Self {
            config,
            alphabet,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn caption(&mut self) -> String {
        if let Some(word) = self.config.words.choose(&mut self.rng) {
            return word.clone();
        }

        let target = self.rng.gen_range(1..=self.config.max_caption_len.max(1));
        let mut caption = String::with_capacity(target);
        while let Some(&c) = self.alphabet.choose(&mut self.rng) {
            if caption.len() + c.len_utf8() > target {
                break;
            }
            caption.push(c);
        }
        caption
    }

    fn image(&mut self, height: usize, width: usize) -> Vec<u8> {
        let mut image = vec![0u8; height * width];
        if self.rng.gen_bool(0.5) {
            self.rng.fill(&mut image[..]);
        } else {
            let span = (height + width).saturating_sub(2).max(1);
            for (y, row) in image.chunks_exact_mut(width).enumerate() {
                for (x, pixel) in row.iter_mut().enumerate() {
                    *pixel = ((x + y) * 255 / span) as u8;
                }
            }
        }
        image
    }
}

impl SampleSource for NoiseSource {
    fn next_sample(&mut self) -> ShmResult<Sample> {
        let height = self
            .rng
            .gen_range(self.config.min_height..=self.config.max_height);
        let width = self
            .rng
            .gen_range(self.config.min_width..=self.config.max_width);
        let caption = self.caption();
        let image = self.image(height as usize, width as usize);
        Sample::new(height, &caption, image)
    }

    fn name(&self) -> &'static str {
        "noise"
    }
}
