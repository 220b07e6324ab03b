//! Forward migration of pre-v4 config files.
//!
//! Versions 1-3 stored `saved_commands` as a flat array in which every
//! command carried a `/`-separated `category` string and, depending on the
//! exact vintage, an `order`, `sequence` or `position` field (or none at
//! all). Migration rebuilds the nested tree: categories are grouped by their
//! normalized path (the comparison the flat format always used), and each
//! command's `order` becomes its positional index within its category, which
//! reproduces the visual order the file had before `order` existed.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tree::{CommandTree, NewNode, NodeId};
use crate::types::{Config, ServerDefinition, Settings, CURRENT_CONFIG_VERSION};

/// Flat command row as written by versions 1-3
#[derive(Debug, Deserialize)]
struct LegacyCommand {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default)]
    label: String,
    /// v1-3 called the text field `command`
    #[serde(default, alias = "command_text")]
    command: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    sequence: Option<i64>,
    #[serde(default)]
    position: Option<i64>,
}

impl LegacyCommand {
    /// Best-available sort key, falling back through the field names older
    /// builds used; commands with no key at all keep file order
    fn sort_key(&self) -> i64 {
        self.order
            .or(self.sequence)
            .or(self.position)
            .unwrap_or(i64::MAX)
    }
}

/// Migrate a parsed pre-v4 document into a current [`Config`]
pub(crate) fn migrate(version: u32, mut doc: Value) -> Config {
    debug!(from = version, to = CURRENT_CONFIG_VERSION, "migrating config");

    let servers: Vec<ServerDefinition> = doc
        .get_mut("servers")
        .map(Value::take)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let settings: Settings = doc
        .get_mut("settings")
        .map(Value::take)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let commands = doc
        .get_mut("saved_commands")
        .map(Value::take)
        .unwrap_or(Value::Array(Vec::new()));

    Config {
        version: CURRENT_CONFIG_VERSION,
        servers,
        saved_commands: migrate_commands(commands),
        settings,
    }
}

fn migrate_commands(raw: Value) -> CommandTree {
    let rows = match raw {
        Value::Array(rows) => rows,
        _ => return CommandTree::new(),
    };

    let mut commands = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<LegacyCommand>(row) {
            Ok(cmd) => commands.push(cmd),
            Err(err) => warn!(%err, "skipping unreadable saved command"),
        }
    }
    // Stable, so commands without an explicit key keep their file order
    commands.sort_by(|a, b| {
        category_key(&a.category)
            .cmp(&category_key(&b.category))
            .then(a.sort_key().cmp(&b.sort_key()))
    });

    let mut tree = CommandTree::new();
    for cmd in commands {
        let parent = ensure_category_path(&mut tree, &cmd.category);
        // Node ids are not carried over; v4 assigns fresh ids and callers
        // re-resolve by path
        let _ = tree.insert(
            parent,
            NewNode::Command {
                label: cmd.label,
                command_text: cmd.command,
            },
            None,
        );
    }
    tree
}

/// Category path normalized the way the original launcher compared them
fn category_key(category: &str) -> Vec<String> {
    category
        .split('/')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Find or create the nested category chain for a `/`-separated path,
/// returning the deepest category (or `None` for the root forest)
fn ensure_category_path(tree: &mut CommandTree, category: &str) -> Option<NodeId> {
    let mut scope: Option<NodeId> = None;
    for segment in category.split('/') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let existing = tree
            .children(scope)
            .ok()
            .and_then(|children| {
                children.iter().copied().find(|id| match tree.node(*id) {
                    Some(crate::tree::NodeKind::Category { name }) => {
                        name.eq_ignore_ascii_case(segment)
                    }
                    _ => false,
                })
            });
        scope = Some(match existing {
            Some(id) => id,
            None => tree
                .insert(
                    scope,
                    NewNode::Category {
                        name: segment.to_string(),
                    },
                    None,
                )
                .expect("category insert under validated parent"),
        });
    }
    scope
}
