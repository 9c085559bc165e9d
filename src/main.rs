use std::collections::HashSet;
use std::env;
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossterm::event::{self, Event, KeyCode};
use ratatui::Terminal;
use serde_json::{json, Map, Value};

use livefeed::cli::Flags;
use livefeed::controllers::FeedController;
use livefeed::error::FeedError;
use livefeed::models::entity::{
    comments_path, post_path, replies_path, Collection, EntityRef, POSTS_PATH,
};
use livefeed::models::{FeedConfig, MemoryStore, RealtimeStore, UserSnapshot};
use livefeed::views::tui::{self, TuiProjector};
use livefeed::views::StatefulList;

const AUTHORS: [&str; 6] = [
    "Maya Okafor",
    "Jonas Lindqvist",
    "Priya Raman",
    "Tomas Vega",
    "Aisha Benali",
    "Niko Saarinen",
];

const PHRASES: [&str; 8] = [
    "Finally got the garden beds ready for spring.",
    "Reading about distributed clocks again, send help.",
    "Coffee number three and the day is just starting.",
    "Anyone else watching the comet tonight?",
    "Shipped a small thing today and it feels great.",
    "Weekend plans: none, and that is the plan.",
    "The new bakery around the corner is dangerous.",
    "Slowly converting the whole team to split keyboards.",
];

fn next_rand(seed: &mut u64) -> u64 {
    *seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *seed >> 33
}

fn author_value(index: usize) -> Value {
    json!({
        "id": format!("user{:02}", index % AUTHORS.len()),
        "name": AUTHORS[index % AUTHORS.len()],
    })
}

/// Pre-populate the store with a browsable history, including a few
/// comment threads so expanding posts has something to show.
fn seed_demo(store: &MemoryStore, count: usize) -> Vec<String> {
    let base = Utc::now().timestamp_millis() - (count as i64 + 1) * 60_000;
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("seed{:04}", i);
        let timestamp = base + i as i64 * 60_000;
        let with_comments = i % 3 == 0;
        let comment_count = if with_comments { 2 } else { 0 };
        store.seed_child(
            POSTS_PATH,
            &id,
            json!({
                "author": author_value(i),
                "content": PHRASES[i % PHRASES.len()],
                "timestamp": timestamp,
                "likes": {},
                "likes_count": 0,
                "comments_count": comment_count,
            }),
        );
        if with_comments {
            let comments = comments_path(&id);
            for c in 0..comment_count {
                let comment_id = format!("c{:04}-{}", i, c);
                store.seed_child(
                    &comments,
                    &comment_id,
                    json!({
                        "author": author_value(i + c + 1),
                        "text": "Right there with you.",
                        "timestamp": timestamp + (c as i64 + 1) * 1000,
                        "likes": {},
                        "likes_count": 0,
                    }),
                );
            }
            // one reply on the first comment of the thread
            store.seed_child(
                &replies_path(&id, &format!("c{:04}-0", i)),
                &format!("r{:04}", i),
                json!({
                    "author": author_value(i + 3),
                    "text": "Same here, honestly.",
                    "timestamp": timestamp + 5000,
                    "likes": {},
                    "likes_count": 0,
                }),
            );
        }
        ids.push(id);
    }
    ids
}

/// Background task that plays remote users against the store: new posts,
/// comments, like toggles and the occasional edit. Everything arrives
/// through the same listeners as real traffic would.
fn spawn_simulator(store: Arc<MemoryStore>, mut known: Vec<String>) {
    tokio::spawn(async move {
        let mut seed: u64 = 0x5DEECE66D;
        loop {
            let wait = 2000 + next_rand(&mut seed) % 3000;
            tokio::time::sleep(Duration::from_millis(wait)).await;

            let actor = (next_rand(&mut seed) as usize) % AUTHORS.len();
            let phrase = PHRASES[(next_rand(&mut seed) as usize) % PHRASES.len()];
            match next_rand(&mut seed) % 10 {
                0..=3 => {
                    let id = store.push_id(POSTS_PATH);
                    let value = json!({
                        "author": author_value(actor),
                        "content": phrase,
                        "timestamp": 0,
                        "likes": {},
                        "likes_count": 0,
                        "comments_count": 0,
                    });
                    if store.write_child(POSTS_PATH, &id, value).await.is_ok() {
                        known.push(id);
                    }
                }
                4..=6 if !known.is_empty() => {
                    let post = known[(next_rand(&mut seed) as usize) % known.len()].clone();
                    let path = comments_path(&post);
                    let id = store.push_id(&path);
                    let value = json!({
                        "author": author_value(actor),
                        "text": phrase,
                        "timestamp": 0,
                        "likes": {},
                        "likes_count": 0,
                    });
                    if store.write_child(&path, &id, value).await.is_ok() {
                        let _ = store
                            .run_transaction(&post_path(&post), &|current| {
                                let mut node = current?.as_object().cloned()?;
                                let count = node
                                    .get("comments_count")
                                    .and_then(Value::as_i64)
                                    .unwrap_or(0);
                                node.insert("comments_count".to_string(), Value::from(count + 1));
                                Some(Value::Object(node))
                            })
                            .await;
                    }
                }
                7..=8 if !known.is_empty() => {
                    let post = known[(next_rand(&mut seed) as usize) % known.len()].clone();
                    let user_id = format!("user{:02}", actor);
                    let user_name = AUTHORS[actor].to_string();
                    let now = Utc::now().timestamp_millis();
                    let toggle = move |current: Option<Value>| {
                        let mut node = current?.as_object().cloned()?;
                        let mut likes = node
                            .get("likes")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default();
                        if likes.remove(&user_id).is_none() {
                            likes.insert(
                                user_id.clone(),
                                json!({"timestamp": now, "user_name": user_name.clone()}),
                            );
                        }
                        node.insert("likes_count".to_string(), Value::from(likes.len() as i64));
                        node.insert("likes".to_string(), Value::Object(likes));
                        Some(Value::Object(node))
                    };
                    let _ = store.run_transaction(&post_path(&post), &toggle).await;
                }
                _ if !known.is_empty() => {
                    let post = known[(next_rand(&mut seed) as usize) % known.len()].clone();
                    let mut fields = Map::new();
                    fields.insert(
                        "content".to_string(),
                        Value::from(format!("{} (edited)", phrase)),
                    );
                    let _ = store.update_fields(&post_path(&post), fields).await;
                }
                _ => {}
            }
        }
    });
}

fn edit_in_editor(file_name: &str) -> Result<String, FeedError> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    let mut temp_path = env::temp_dir();
    temp_path.push(file_name);

    let status = Command::new(editor).arg(&temp_path).status()?;
    if !status.success() {
        return Err(FeedError::Io(
            "editor exited with non-zero status".to_string(),
        ));
    }

    let content = fs::read_to_string(&temp_path)?;
    let _ = fs::remove_file(&temp_path);
    Ok(content)
}

/// Drop out of the TUI, collect text in $EDITOR, come back. Returns `None`
/// when the user wrote nothing.
fn compose_via_editor(
    terminal: &mut Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>,
    file_name: &str,
) -> Result<Option<String>, FeedError> {
    tui::restore_terminal(terminal)?;
    let result = edit_in_editor(file_name);
    *terminal = tui::setup_terminal()?;
    terminal.clear()?;
    match result {
        Ok(text) if !text.trim().is_empty() => Ok(Some(text)),
        Ok(_) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn maybe_load_more(
    feed: &FeedController,
    list: &StatefulList<tui::PostView>,
    threshold: usize,
) {
    if list.is_near_end(threshold) && !feed.is_exhausted() {
        // Errors surface through the projector's inline error line.
        let _ = feed.request_next_page().await;
    }
}

async fn run_app(
    terminal: &mut Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>,
    feed: &FeedController,
    projector: &Arc<TuiProjector>,
    config: &FeedConfig,
) -> Result<(), FeedError> {
    let mut expanded: HashSet<String> = HashSet::new();
    let mut list: StatefulList<tui::PostView> = StatefulList::with_items(Vec::new());
    let mut error_line: Option<String> = None;
    let mut needs_rebuild = true;

    loop {
        if projector.take_dirty() || needs_rebuild {
            if let Some(err) = projector.take_error() {
                error_line = Some(format!("{} (x to dismiss)", err));
            }
            let rows = tui::build_post_views(
                feed.cache(),
                &projector.feed_order(),
                &expanded,
                &feed.current_user().id,
            );
            list.set_items(rows);
            needs_rebuild = false;
        }

        let status = if projector.feed_is_empty() {
            String::from("Feed - nothing here yet, press n to post")
        } else if feed.is_exhausted() {
            String::from("Feed - end of history")
        } else {
            String::from("Feed - j/k scroll, enter expand, l like, c comment, r reply, n post, q quit")
        };
        terminal.draw(|f| tui::render_ui(f, &mut list, status, error_line.as_deref()))?;

        if !event::poll(Duration::from_millis(120))? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Esc => return Ok(()),
                KeyCode::Down | KeyCode::Char('j') => {
                    list.next();
                    maybe_load_more(feed, &list, config.scroll_threshold).await;
                    needs_rebuild = true;
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    list.previous();
                    needs_rebuild = true;
                }
                KeyCode::Char('g') => {
                    list.first();
                    needs_rebuild = true;
                }
                KeyCode::Char('G') => {
                    list.last();
                    maybe_load_more(feed, &list, config.scroll_threshold).await;
                    needs_rebuild = true;
                }
                KeyCode::Enter => {
                    if let Some(post) = list.selected() {
                        let id = post.id.clone();
                        if !expanded.remove(&id) {
                            expanded.insert(id);
                        }
                        needs_rebuild = true;
                    }
                }
                KeyCode::Char('l') => {
                    if let Some(post) = list.selected() {
                        let target = EntityRef::Post {
                            post_id: post.id.clone(),
                        };
                        let _ = feed.toggle_like(&target).await;
                        needs_rebuild = true;
                    }
                }
                KeyCode::Char('c') => {
                    if let Some(post) = list.selected() {
                        let post_id = post.id.clone();
                        if let Some(text) = compose_via_editor(terminal, "livefeed-comment")? {
                            let _ = feed.submit_comment(&post_id, &text).await;
                            expanded.insert(post_id);
                        }
                        needs_rebuild = true;
                    }
                }
                KeyCode::Char('r') => {
                    if let Some(post) = list.selected() {
                        let post_id = post.id.clone();
                        // reply lands on the newest comment of the thread
                        let mut comments =
                            feed.cache().list(Collection::Comments, Some(&post_id));
                        comments.sort_by_key(|c| std::cmp::Reverse(c.timestamp()));
                        if let Some(comment) = comments.first() {
                            let comment_id = comment.id().to_string();
                            if let Some(text) = compose_via_editor(terminal, "livefeed-reply")? {
                                let _ = feed.submit_reply(&post_id, &comment_id, &text).await;
                                expanded.insert(post_id);
                            }
                        }
                        needs_rebuild = true;
                    }
                }
                KeyCode::Char('n') => {
                    if let Some(text) = compose_via_editor(terminal, "livefeed-post")? {
                        let _ = feed.submit_post(&text).await;
                    }
                    needs_rebuild = true;
                }
                KeyCode::Char('m') => {
                    let _ = feed.request_next_page().await;
                    needs_rebuild = true;
                }
                KeyCode::Char('x') => {
                    error_line = None;
                    needs_rebuild = true;
                }
                _ => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::from_args();

    let mut config = FeedConfig::load()?;
    let mut overridden = false;
    if let Some(name) = flags.name {
        config.display_name = name;
        overridden = true;
    }
    if let Some(page_size) = flags.page_size {
        config.page_size = page_size.max(1);
        overridden = true;
    }
    if flags.no_simulate {
        config.simulate = false;
    }
    if overridden {
        if let Err(err) = config.save() {
            log::warn!("could not save config: {}", err);
        }
    }
    let seed_count = flags.seed.unwrap_or(40);

    let store = Arc::new(MemoryStore::new());
    let seeded = seed_demo(&store, seed_count);

    let viewer = UserSnapshot {
        id: "viewer".to_string(),
        name: config.display_name.clone(),
        photo_url: None,
    };
    let projector = Arc::new(TuiProjector::new());
    let feed = FeedController::new(
        store.clone(),
        projector.clone(),
        viewer,
        config.page_size,
    );
    feed.start().await?;

    if config.simulate {
        spawn_simulator(store.clone(), seeded);
    }

    // Setup terminal
    let mut terminal = tui::setup_terminal()?;

    let res = run_app(&mut terminal, &feed, &projector, &config).await;

    // Restore terminal
    tui::restore_terminal(&mut terminal)?;
    feed.shutdown();

    if let Err(err) = res {
        eprintln!("{:?}", err);
    }

    Ok(())
}
