//! Line-based terminal rendering. [`render`] is pure so it can be tested without a terminal.

use parrot::{Alignment, Delivery, Projection, Row};

pub const WIDTH: usize = 72;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    SignOut,
    /// Retry every failed send.
    Retry,
    Submit(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "/quit" => Command::Quit,
            "/signout" => Command::SignOut,
            "/retry" => Command::Retry,
            _ => Command::Submit(line.to_string()),
        }
    }
}

/// The screen for `projection`: a header, at most `rows` messages ending at the row to scroll to, and
/// the draft prompt.
pub fn render(projection: &Projection, identity: &str, draft: &str, rows: usize) -> Vec<String> {
    let mut lines = vec![format!("natter | signed in as {identity}"), "-".repeat(WIDTH)];

    let end = projection.scroll_to.map_or(0, |newest| newest + 1);
    let visible = &projection.rows[..end.min(projection.rows.len())];
    if visible.is_empty() {
        lines.push("No messages yet.".to_string());
    }
    let skip = visible.len().saturating_sub(rows);
    lines.extend(visible[skip..].iter().map(render_row));

    lines.push("-".repeat(WIDTH));
    lines.push(format!("> {draft}"));
    lines
}

fn render_row(row: &Row) -> String {
    let status = match &row.delivery {
        Delivery::Pending => " (sending)".to_string(),
        Delivery::Confirmed => String::new(),
        Delivery::Failed { reason } => format!(" (failed: {reason})"),
    };
    let time = format!("{:<5}", row.time);

    match row.alignment {
        Alignment::Other => format!("{time} {}: {}{status}", row.owner, row.body),
        Alignment::SelfAuthored => {
            let text = format!("{}{status} {time}", row.body);
            format!("{text:>WIDTH$}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(alignment: Alignment, owner: &str, body: &str, time: &str, delivery: Delivery) -> Row {
        Row {
            alignment,
            owner: owner.to_string(),
            body: body.to_string(),
            time: time.to_string(),
            delivery,
        }
    }

    fn projection(rows: Vec<Row>) -> Projection {
        Projection {
            scroll_to: rows.len().checked_sub(1),
            rows,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse(" /signout "), Command::SignOut);
        assert_eq!(Command::parse("/retry"), Command::Retry);
        assert_eq!(
            Command::parse("hello /quit"),
            Command::Submit("hello /quit".to_string())
        );
    }

    #[test]
    fn test_render_alignment_and_state() {
        let lines = render(
            &projection(vec![
                row(Alignment::Other, "bob", "hi", "12:00", Delivery::Confirmed),
                row(Alignment::SelfAuthored, "alice", "hello", "", Delivery::Pending),
            ]),
            "alice",
            "typing",
            20,
        );

        assert_eq!(lines[0], "natter | signed in as alice");
        assert_eq!(lines[2], "12:00 bob: hi");
        assert_eq!(lines[3].chars().count(), WIDTH);
        assert!(lines[3].starts_with(' '));
        assert_eq!(lines[3].trim(), "hello (sending)");
        assert_eq!(lines.last().unwrap(), "> typing");
    }

    #[test]
    fn test_render_failed_send() {
        let lines = render(
            &projection(vec![row(
                Alignment::SelfAuthored,
                "alice",
                "hello",
                "",
                Delivery::Failed {
                    reason: "offline".to_string(),
                },
            )]),
            "alice",
            "",
            20,
        );
        assert_eq!(lines[2].trim(), "hello (failed: offline)");
    }

    #[test]
    fn test_render_shows_the_newest_rows() {
        let rows = (0..5)
            .map(|i| row(Alignment::Other, "bob", &i.to_string(), "12:00", Delivery::Confirmed))
            .collect();
        let lines = render(&projection(rows), "alice", "", 2);

        assert_eq!(lines.len(), 2 + 2 + 2);
        assert_eq!(lines[2], "12:00 bob: 3");
        assert_eq!(lines[3], "12:00 bob: 4");
    }

    #[test]
    fn test_render_empty() {
        let lines = render(&Projection::default(), "alice", "", 20);
        assert_eq!(lines[2], "No messages yet.");
    }
}
