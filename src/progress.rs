/// Progress value and label for the step currently being attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub fraction: f64,
    pub label: String,
}

/// Convert (attempted steps, selection size) into a fraction and a status label.
///
/// `total` is the size of the selection fixed at run start; an empty total
/// reports zero rather than dividing by it.
pub fn compute_progress(current: usize, total: usize, name: &str) -> Progress {
    let fraction = if total == 0 {
        0.0
    } else {
        (current.min(total) as f64) / (total as f64)
    };
    Progress {
        fraction,
        label: format!("[{current}/{total}] {name}"),
    }
}
