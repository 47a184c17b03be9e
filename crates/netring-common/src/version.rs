/// Workspace version baked in at compile time, reported by `/health` and in
/// the snapshot `general` section.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
