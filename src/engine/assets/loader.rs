// Loaders: asynchronous fetch + decode of a single resource

use image::RgbaImage;
use std::rc::Rc;

use super::ContentError;
use crate::core::CancelToken;
use crate::engine::io::{Delivery, ImageDelivery, IoBackend};

/// Completion callback handed to a loader
pub type OnDone<T> = Box<dyn FnOnce(T) -> Result<(), ContentError>>;

/// Starts an asynchronous load and returns a handle that aborts it.
///
/// `on_done` fires at most once and never after the token was cancelled.
/// Failures are returned from the delivery, so they surface from the pump
/// that delivered them.
pub trait Loader {
    type Output;

    fn load(&self, url: &str, on_done: OnDone<Self::Output>) -> CancelToken;
}

/// Fetches a resource as UTF-8 text
#[derive(Clone)]
pub struct TextLoader {
    io: Rc<dyn IoBackend>,
}

impl TextLoader {
    pub fn new(io: Rc<dyn IoBackend>) -> Self {
        Self { io }
    }
}

impl Loader for TextLoader {
    type Output = String;

    fn load(&self, url: &str, on_done: OnDone<String>) -> CancelToken {
        let owned_url = url.to_string();
        self.io.fetch(
            url,
            Box::new(move |delivery: Delivery| {
                let response = delivery?;
                if !response.is_success() {
                    return Err(ContentError::Transport {
                        url: owned_url,
                        status: response.status,
                    });
                }
                let text = String::from_utf8(response.body)
                    .map_err(|_| ContentError::NotText { url: owned_url })?;
                on_done(text)
            }),
        )
    }
}

/// Fetches a resource as text and parses it as JSON
#[derive(Clone)]
pub struct JsonLoader {
    text: TextLoader,
}

impl JsonLoader {
    pub fn new(io: Rc<dyn IoBackend>) -> Self {
        Self {
            text: TextLoader::new(io),
        }
    }
}

impl Loader for JsonLoader {
    type Output = serde_json::Value;

    fn load(&self, url: &str, on_done: OnDone<serde_json::Value>) -> CancelToken {
        let owned_url = url.to_string();
        // Cancellation is the text loader's
        self.text.load(
            url,
            Box::new(move |text| {
                let value = serde_json::from_str(&text).map_err(|source| ContentError::Parse {
                    url: owned_url,
                    source,
                })?;
                on_done(value)
            }),
        )
    }
}

/// A decoded image, always stored as RGBA8
#[derive(Debug, Clone)]
pub struct DecodedImage {
    url: String,
    pixels: RgbaImage,
}

impl DecodedImage {
    /// Decode encoded image bytes
    pub fn decode(url: &str, bytes: &[u8]) -> Result<Self, ContentError> {
        let image = image::load_from_memory(bytes).map_err(|source| ContentError::Decode {
            url: url.to_string(),
            source,
        })?;

        Ok(Self {
            url: url.to_string(),
            pixels: image.to_rgba8(),
        })
    }

    /// Check a fetch result and decode its body
    pub fn from_delivery(url: &str, delivery: Delivery) -> ImageDelivery {
        let response = delivery?;
        if !response.is_success() {
            return Err(ContentError::Transport {
                url: url.to_string(),
                status: response.status,
            });
        }
        Self::decode(url, &response.body)
    }

    /// Where the image was loaded from
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Raw RGBA pixels
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Fetches an image and has the I/O workers decode it.
///
/// Decoding itself cannot be interrupted; cancelling only suppresses the
/// delivery.
#[derive(Clone)]
pub struct ImageLoader {
    io: Rc<dyn IoBackend>,
}

impl ImageLoader {
    pub fn new(io: Rc<dyn IoBackend>) -> Self {
        Self { io }
    }
}

impl Loader for ImageLoader {
    type Output = Rc<DecodedImage>;

    fn load(&self, url: &str, on_done: OnDone<Rc<DecodedImage>>) -> CancelToken {
        self.io.fetch_image(
            url,
            Box::new(move |delivery: ImageDelivery| {
                let image = delivery?;
                log::debug!(
                    "Decoded \"{}\" ({}x{})",
                    image.url(),
                    image.width(),
                    image.height()
                );
                on_done(Rc::new(image))
            }),
        )
    }
}
