/// Errors surfaced by the fallible constructors in this crate.
///
/// The notification engine itself exposes no fallible operations; malformed
/// input is rejected here, at value construction time.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
