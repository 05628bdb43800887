use crate::ProgressEvent;

/// One-line rendering, e.g. `[deps 100%] Installed 3 packages`.
pub fn render_line(event: &ProgressEvent) -> String {
    match event.percent {
        Some(percent) => format!("[{} {:>3}%] {}", event.stage, percent, event.message),
        None => format!("[{}] {}", event.stage, event.message),
    }
}
