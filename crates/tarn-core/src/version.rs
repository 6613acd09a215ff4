/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with every registry request.
#[must_use]
pub fn user_agent() -> String {
    format!("tarn/{VERSION} (+npm-compatible)")
}
