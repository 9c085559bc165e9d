use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{Local, TimeZone};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::Line,
    prelude::Span,
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};

use crate::models::cache::EntityCache;
use crate::models::entity::{Collection, Entity};
use crate::views::projector::Projector;
use crate::views::widgets::StatefulList;

/// Projector for the terminal client.
///
/// The TUI redraws whole entries from the cache, so this only has to keep
/// the feed order (ids, new posts in front, pages in back) and flag that a
/// redraw is due. Rendering stays a pure function of cache plus this order.
pub struct TuiProjector {
    order: Mutex<VecDeque<String>>,
    dirty: AtomicBool,
    last_error: Mutex<Option<String>>,
    empty: AtomicBool,
}

impl TuiProjector {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(VecDeque::new()),
            dirty: AtomicBool::new(true),
            last_error: Mutex::new(None),
            empty: AtomicBool::new(false),
        }
    }

    pub fn feed_order(&self) -> Vec<String> {
        self.order.lock().unwrap().iter().cloned().collect()
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn take_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().take()
    }

    pub fn feed_is_empty(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }
}

impl Default for TuiProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector for TuiProjector {
    fn on_entity_upserted(&self, collection: Collection, id: &str, _entity: &Entity, is_new: bool) {
        if collection == Collection::Posts && is_new {
            let mut order = self.order.lock().unwrap();
            if !order.iter().any(|existing| existing == id) {
                order.push_front(id.to_string());
            }
        }
        self.empty.store(false, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn on_entity_removed(&self, collection: Collection, id: &str) {
        if collection == Collection::Posts {
            self.order.lock().unwrap().retain(|existing| existing != id);
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn on_page_appended(&self, items: &[Entity]) {
        let mut order = self.order.lock().unwrap();
        for item in items {
            if !order.iter().any(|existing| existing == item.id()) {
                order.push_back(item.id().to_string());
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn on_feed_empty(&self) {
        self.empty.store(true, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn on_inline_error(&self, scope: &str, message: &str) {
        *self.last_error.lock().unwrap() = Some(format!("{}: {}", scope, message));
        self.dirty.store(true, Ordering::SeqCst);
    }
}

pub struct ReplyView {
    pub author: String,
    pub text: String,
    pub likes: i64,
}

pub struct CommentView {
    pub author: String,
    pub text: String,
    pub likes: i64,
    pub replies: Vec<ReplyView>,
}

pub struct PostView {
    pub id: String,
    pub author: String,
    pub when: String,
    pub content: Vec<String>,
    pub liked: bool,
    pub likes: i64,
    pub comments: i64,
    pub expanded: bool,
    pub comment_rows: Vec<CommentView>,
}

fn format_time(timestamp: i64) -> String {
    match Local.timestamp_millis_opt(timestamp).single() {
        Some(time) => time.format("%H:%M %h-%d-%Y").to_string(),
        None => String::from("--:--"),
    }
}

/// Assemble render rows from the cache in the projector's feed order.
/// Comments and replies render newest first.
pub fn build_post_views(
    cache: &EntityCache,
    order: &[String],
    expanded: &HashSet<String>,
    viewer_id: &str,
) -> Vec<PostView> {
    let mut views = Vec::with_capacity(order.len());
    for post_id in order {
        let Some(Entity::Post(post)) = cache.get(Collection::Posts, post_id) else {
            continue;
        };
        let is_expanded = expanded.contains(post_id);
        let mut comment_rows = Vec::new();
        if is_expanded {
            let mut comments = cache.list(Collection::Comments, Some(post_id));
            comments.sort_by_key(|c| std::cmp::Reverse(c.timestamp()));
            for comment in comments {
                let Entity::Comment(comment) = comment else {
                    continue;
                };
                let mut replies = cache.list(Collection::Replies, Some(&comment.id));
                replies.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
                let reply_rows = replies
                    .into_iter()
                    .filter_map(|reply| match reply {
                        Entity::Reply(reply) => Some(ReplyView {
                            author: reply.author.name,
                            text: reply.text,
                            likes: reply.likes_count,
                        }),
                        _ => None,
                    })
                    .collect();
                comment_rows.push(CommentView {
                    author: comment.author.name,
                    text: comment.text,
                    likes: comment.likes_count,
                    replies: reply_rows,
                });
            }
        }
        views.push(PostView {
            id: post.id.clone(),
            author: post.author.name.clone(),
            when: format_time(post.timestamp),
            content: post
                .content
                .as_deref()
                .unwrap_or("")
                .lines()
                .map(str::to_string)
                .collect(),
            liked: post.likes.contains_key(viewer_id),
            likes: post.likes_count,
            comments: post.comments_count,
            expanded: is_expanded,
            comment_rows,
        });
    }
    views
}

pub fn setup_terminal() -> io::Result<Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(
    terminal: &mut Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>,
) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()
}

pub fn render_ui<B: ratatui::backend::Backend>(
    f: &mut Frame<B>,
    stateful_list: &mut StatefulList<PostView>,
    status: String,
    error: Option<&str>,
) {
    let constraints = if error.is_some() {
        vec![Constraint::Min(1), Constraint::Length(1)]
    } else {
        vec![Constraint::Percentage(100)]
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(constraints)
        .split(f.size());

    let items: Vec<ListItem> = stateful_list
        .items
        .iter()
        .map(|post| {
            // Header line with author, timestamp and engagement counts
            let heart = if post.liked { "liked" } else { "like" };
            let header = Line::from(vec![Span::styled(
                format!("{} posted at {}", post.author, post.when),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]);
            let meta = Line::from(vec![Span::styled(
                format!(
                    "  {} likes [{}]   {} comments{}",
                    post.likes,
                    heart,
                    post.comments,
                    if post.expanded { "" } else { "  (enter to expand)" }
                ),
                Style::default().fg(Color::DarkGray),
            )]);

            let mut all_lines = vec![header];
            for line in &post.content {
                all_lines.push(Line::from(line.clone()));
            }
            all_lines.push(meta);
            if post.expanded {
                for comment in &post.comment_rows {
                    all_lines.push(Line::from(vec![Span::styled(
                        format!(
                            "    {}: {} ({} likes)",
                            comment.author, comment.text, comment.likes
                        ),
                        Style::default().fg(Color::Gray),
                    )]));
                    for reply in &comment.replies {
                        all_lines.push(Line::from(vec![Span::styled(
                            format!(
                                "        {}: {} ({} likes)",
                                reply.author, reply.text, reply.likes
                            ),
                            Style::default().fg(Color::DarkGray),
                        )]));
                    }
                }
            }
            all_lines.push(Line::from(""));

            ListItem::new(all_lines).style(Style::default())
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().title(status).borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .bg(Color::Gray)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        );

    f.render_stateful_widget(list, chunks[0], &mut stateful_list.state);

    if let Some(message) = error {
        let bar = Line::from(vec![Span::styled(
            message.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]);
        f.render_widget(Paragraph::new(bar), chunks[chunks.len() - 1]);
    }
}
