use anyhow::Error;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Produce a rectangle centered within `area` that spans the requested percent
/// of the width and height. Used for modal dialogs.
pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(horizontal[1]);

    vertical[1]
}

/// Extract the most relevant error message from a chained error.
pub(crate) fn surface_error(err: &Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}

/// Five-star gauge, e.g. `★★★☆☆`, or a dash when unrated.
pub(crate) fn rating_stars(rating: Option<u8>) -> String {
    match rating {
        Some(value) => {
            let filled = usize::from(value.min(5));
            format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
        }
        None => "-".to_string(),
    }
}

/// Footer hint line from `(key, description)` pairs.
pub(crate) fn key_hints(pairs: &[(&str, &str)]) -> Line<'static> {
    let key_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let mut spans = Vec::with_capacity(pairs.len() * 2);
    for (idx, (key, description)) in pairs.iter().enumerate() {
        spans.push(Span::styled(format!("[{key}]"), key_style));
        let gap = if idx + 1 == pairs.len() { "" } else { "   " };
        spans.push(Span::raw(format!(" {description}{gap}")));
    }
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn stars_cover_range() {
        assert_eq!(rating_stars(Some(3)), "★★★☆☆");
        assert_eq!(rating_stars(Some(5)), "★★★★★");
        assert_eq!(rating_stars(None), "-");
    }

    #[test]
    fn surface_error_uses_root_cause() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("failed to insert book")
            .unwrap_err();
        assert_eq!(surface_error(&err), "disk full");
    }

    #[test]
    fn centered_rect_stays_inside() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered_rect(60, 50, area);
        assert!(popup.x >= area.x && popup.right() <= area.right());
        assert_eq!(popup.width, 60);
    }
}
