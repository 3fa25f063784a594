use std::path::PathBuf;

/// Default label font when `LINEUP_FONT` is unset.
const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// Tool configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// TrueType font used for label text.
    pub font_path: PathBuf,
}

impl Config {
    /// Load configuration from `LINEUP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            model_dir: lineup_core::default_model_dir(),
            font_path: std::env::var("LINEUP_FONT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_FONT)),
        }
    }
}
