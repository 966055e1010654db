//! Pixel strip capability interface
//!
//! The actuator renders through this trait so hardware presence is
//! invisible to callers: a WS2812B driver when the `ws281x` feature is
//! enabled and the device is present, a software stand-in otherwise.

use super::color::Rgb;
use crate::config::LedConfig;
use anyhow::Result;
use tracing::{info, warn};

/// A writable run of addressable pixels
pub trait PixelStrip: Send {
    /// Number of pixels
    fn len(&self) -> usize;

    /// Set the global hardware brightness register (0..=255)
    fn set_brightness(&mut self, value: u8);

    /// Stage one pixel; visible after the next `show`
    fn set_pixel(&mut self, index: usize, rgb: Rgb);

    /// Push staged pixels to the device
    fn show(&mut self) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Software stand-in used when no strip hardware is available.
///
/// Accepts the same operations and discards the writes, keeping a frame
/// counter and the last staged frame so tests can observe behavior.
pub struct NullStrip {
    pixels: Vec<Rgb>,
    brightness: u8,
    shows: u64,
}

impl NullStrip {
    pub fn new(count: usize) -> Self {
        Self {
            pixels: vec![(0, 0, 0); count],
            brightness: 255,
            shows: 0,
        }
    }

    /// Frames pushed so far
    pub fn show_count(&self) -> u64 {
        self.shows
    }

    /// Last staged frame
    pub fn frame(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }
}

impl PixelStrip for NullStrip {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    fn set_pixel(&mut self, index: usize, rgb: Rgb) {
        if let Some(px) = self.pixels.get_mut(index) {
            *px = rgb;
        }
    }

    fn show(&mut self) -> Result<()> {
        self.shows += 1;
        Ok(())
    }
}

/// WS2812B strip on the Raspberry Pi PWM/DMA peripheral
#[cfg(feature = "ws281x")]
pub struct Ws281xStrip {
    controller: rs_ws281x::Controller,
    channel: usize,
    count: usize,
}

#[cfg(feature = "ws281x")]
impl Ws281xStrip {
    pub fn open(cfg: &LedConfig) -> Result<Self> {
        use rs_ws281x::{ChannelBuilder, ControllerBuilder, StripType};

        let controller = ControllerBuilder::new()
            .freq(cfg.freq_hz)
            .dma(cfg.dma as i32)
            .channel(
                cfg.channel as usize,
                ChannelBuilder::new()
                    .pin(cfg.gpio_pin as i32)
                    .count(cfg.count as i32)
                    .strip_type(StripType::Ws2812)
                    .invert(cfg.invert)
                    .brightness(255)
                    .build(),
            )
            .build()?;

        Ok(Self {
            controller,
            channel: cfg.channel as usize,
            count: cfg.count,
        })
    }
}

#[cfg(feature = "ws281x")]
impl PixelStrip for Ws281xStrip {
    fn len(&self) -> usize {
        self.count
    }

    fn set_brightness(&mut self, value: u8) {
        self.controller.set_brightness(self.channel, value);
    }

    fn set_pixel(&mut self, index: usize, rgb: Rgb) {
        let leds = self.controller.leds_mut(self.channel);
        if let Some(led) = leds.get_mut(index) {
            // Controller channel order is BGRW
            *led = [rgb.2, rgb.1, rgb.0, 0];
        }
    }

    fn show(&mut self) -> Result<()> {
        self.controller.render()?;
        Ok(())
    }
}

/// Open the best available strip for this host.
///
/// Falls back to the software stand-in when the hardware driver is
/// compiled out, disabled in config, or fails to initialize.
pub fn open_strip(cfg: &LedConfig, force_software: bool) -> Box<dyn PixelStrip> {
    if force_software || !cfg.hardware {
        info!("💡 LED strip: software stand-in ({} pixels)", cfg.count);
        return Box::new(NullStrip::new(cfg.count));
    }

    #[cfg(feature = "ws281x")]
    {
        match Ws281xStrip::open(cfg) {
            Ok(strip) => {
                info!(
                    "💡 LED strip: WS2812B on GPIO{} ({} pixels)",
                    cfg.gpio_pin, cfg.count
                );
                return Box::new(strip);
            }
            Err(e) => {
                warn!("⚠️  WS2812B init failed, using software stand-in: {}", e);
                return Box::new(NullStrip::new(cfg.count));
            }
        }
    }

    #[cfg(not(feature = "ws281x"))]
    {
        warn!("⚠️  Built without ws281x support, using software stand-in");
        Box::new(NullStrip::new(cfg.count))
    }
}
