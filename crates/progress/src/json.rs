use crate::ProgressEvent;

pub fn render_json(event: &ProgressEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}
