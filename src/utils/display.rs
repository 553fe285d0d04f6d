use chrono::{DateTime, Utc};
use ratatui::style::Color;

use crate::core::{AgentStatus, ConnectionState};

const MAX_PATH_LENGTH: usize = 50;

pub fn status_label(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Running => "Running",
        AgentStatus::Stopped => "Stopped",
        AgentStatus::Error => "Error",
        AgentStatus::Starting => "Starting…",
        AgentStatus::WaitingApproval => "Needs Approval",
    }
}

pub fn status_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Running => Color::Green,
        AgentStatus::Stopped => Color::Gray,
        AgentStatus::Error => Color::Red,
        AgentStatus::Starting => Color::Yellow,
        AgentStatus::WaitingApproval => Color::Magenta,
    }
}

pub fn connection_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Open => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Closed => Color::Red,
    }
}

/// "just now", "5m ago", "3h ago", "2d ago"
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    if elapsed.num_seconds() < 60 {
        "just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

/// Up to two uppercase initials of a display name
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect()
}

/// Remote working directory for a prompt; the bridge's home before the
/// first command reports one
pub fn shorten_cwd(cwd: &str) -> String {
    if cwd.is_empty() {
        return "~".to_string();
    }

    let chars: Vec<char> = cwd.chars().collect();
    if chars.len() <= MAX_PATH_LENGTH {
        return cwd.to_string();
    }

    // Keep both ends of very long paths
    let start_len = MAX_PATH_LENGTH / 2 - 2;
    let end_len = MAX_PATH_LENGTH / 2 - 1;
    let start: String = chars[..start_len].iter().collect();
    let end: String = chars[chars.len() - end_len..].iter().collect();
    format!("{}...{}", start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(AgentStatus::Starting), "Starting…");
        assert_eq!(status_label(AgentStatus::WaitingApproval), "Needs Approval");
    }

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(relative_time(now - Duration::seconds(5), now), "just now");
        assert_eq!(relative_time(now - Duration::minutes(12), now), "12m ago");
        assert_eq!(relative_time(now - Duration::hours(3), now), "3h ago");
        assert_eq!(relative_time(now - Duration::days(2), now), "2d ago");
        // Clock skew shows as fresh
        assert_eq!(relative_time(now + Duration::minutes(5), now), "just now");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("code reviewer bot"), "CR");
        assert_eq!(initials("worker"), "W");
        assert_eq!(initials("  "), "");
    }

    #[test]
    fn test_shorten_cwd() {
        assert_eq!(shorten_cwd(""), "~");
        assert_eq!(shorten_cwd("/tmp"), "/tmp");

        let long = format!("/home/dev/{}/src", "nested/".repeat(10));
        let shown = shorten_cwd(&long);
        assert_eq!(shown.chars().count(), 50);
        assert!(shown.starts_with("/home/dev/"));
        assert!(shown.ends_with("/src"));
        assert!(shown.contains("..."));
    }
}
