/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Turn a video title into a safe file stem: word characters joined by
/// underscores, at most `max_chars` long
pub fn sanitize_filename(title: &str, max_chars: usize) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect();

    let stem = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    stem.chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end_matches('_')
        .to_string()
}

/// Generate a unique file stem with timestamp
pub fn generate_unique_stem(base_name: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let random_suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

    format!("{}_{}_{}", base_name, timestamp, random_suffix)
}

/// Generate a unique filename with timestamp
pub fn generate_unique_filename(base_name: &str, extension: &str) -> String {
    format!("{}.{}", generate_unique_stem(base_name), extension)
}

/// External tools the selected strategy needs but cannot find
pub async fn check_dependencies(needs_yt_dlp: bool) -> Vec<String> {
    let mut missing = Vec::new();

    if needs_yt_dlp && !crate::video::YtDlpClient::new().check_availability().await {
        missing.push("yt-dlp - required to download audio for the remote and local strategies".to_string());
    }

    missing
}
