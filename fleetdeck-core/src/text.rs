/// Formats an elapsed duration in whole seconds as `MM:SS`.
///
/// Minutes are not wrapped into hours: 3665 seconds renders as `61:05`.
pub fn format_elapsed(secs: u64) -> String {
    let minutes = secs / 60;
    let seconds = secs % 60;
    format!("{minutes:02}:{seconds:02}")
}
