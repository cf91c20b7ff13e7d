//! Connection target for the denoising service.
//!
//! The service expects everything in the URL path:
//! `<scheme>://<host>:<port>/denoise/<in_format>/<out_format>/<api_key>/<bytes_per_sample>/<in_hz>/<out_hz>`
//! Both formats are raw PCM, so container headers never travel over the wire.

use crate::config::{EndpointConfig, Scheme};
use crate::error::{DenoiseError, Result};
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;
use url::Url;

pub const PCM_FORMAT: &str = "pcm";

#[derive(Debug)]
pub struct EndpointDescriptor {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub input_format: &'static str,
    pub output_format: &'static str,
    api_key: SecretBox<String>,
    pub bytes_per_sample: u16,
    pub input_frequency_hz: u32,
    pub output_frequency_hz: u32,
}

impl EndpointDescriptor {
    /// Build the descriptor for one run. Rejects zero-valued format parameters
    /// before anything touches the network.
    pub fn build(
        config: &EndpointConfig,
        bytes_per_sample: u16,
        input_frequency_hz: u32,
        output_frequency_hz: u32,
    ) -> Result<Self> {
        if bytes_per_sample == 0 {
            return Err(DenoiseError::InvalidParameter(
                "sample width must be at least 1 byte".to_string(),
            ));
        }
        if input_frequency_hz == 0 {
            return Err(DenoiseError::InvalidParameter(
                "input sampling frequency must be positive".to_string(),
            ));
        }
        if output_frequency_hz == 0 {
            return Err(DenoiseError::InvalidParameter(
                "output sampling frequency must be positive".to_string(),
            ));
        }

        Ok(Self {
            scheme: config.scheme,
            host: config.host.clone(),
            port: config.port,
            input_format: PCM_FORMAT,
            output_format: PCM_FORMAT,
            api_key: SecretBox::new(Box::new(config.api_key().to_string())),
            bytes_per_sample,
            input_frequency_hz,
            output_frequency_hz,
        })
    }

    fn format_target(&self, api_key: &str) -> String {
        format!(
            "{}://{}:{}/denoise/{}/{}/{}/{}/{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.input_format,
            self.output_format,
            api_key,
            self.bytes_per_sample,
            self.input_frequency_hz,
            self.output_frequency_hz
        )
    }

    /// The full connection target, credential included
    pub fn target(&self) -> String {
        self.format_target(self.api_key.expose_secret())
    }

    /// The connection target parsed as a URL
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.target()).map_err(|e| {
            DenoiseError::InvalidParameter(format!("invalid endpoint address {}: {}", self, e))
        })
    }
}

/// Displays the target with the credential masked, for logs.
impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_target("***"))
    }
}
