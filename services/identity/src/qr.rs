use crate::config::QrConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::render::svg;
use qrcode::QrCode;

/// Builds the payload a record's QR code encodes
#[derive(Debug, Clone)]
pub struct QrBuilder {
    base_url: String,
    render_image: bool,
}

impl QrBuilder {
    pub fn new(config: &QrConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            render_image: config.render_image,
        }
    }

    /// Canonical lookup URL for an identifier
    pub fn build(&self, id: &str) -> String {
        format!("{}{}", self.base_url, id)
    }

    /// Whether responses should carry a rendered image
    pub fn renders_image(&self) -> bool {
        self.render_image
    }

    /// Render QR content as an SVG data URL
    pub fn render_data_url(&self, content: &str) -> Result<String, qrcode::types::QrError> {
        let code = QrCode::new(content.as_bytes())?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .quiet_zone(true)
            .build();

        Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
    }
}
