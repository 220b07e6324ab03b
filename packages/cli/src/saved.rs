//! Saved-command tree editing from the command line.
//!
//! Nodes are addressed by id or by "/"-separated path; every mutation is
//! written back through the atomic config save.

use clap::Subcommand;
use colored::*;
use std::path::Path;

use mineshed_config::{ConfigStore, NewNode, NodeKind};

#[derive(Subcommand)]
pub enum SavedCommands {
    /// Print the whole command tree
    List,
    /// Add a command, or a category when --command is omitted
    Add {
        /// Label of the new node
        label: String,
        /// Console text to send; omit to create a category
        #[arg(long)]
        command: Option<String>,
        /// Parent category, as an id or a path like "Admin/Backups"
        #[arg(long)]
        parent: Option<String>,
        /// Position among siblings (default: append)
        #[arg(long)]
        position: Option<usize>,
    },
    /// Remove a node; a category takes its whole subtree with it
    Remove {
        /// Node to remove, as an id or a path
        target: String,
    },
    /// Move a node under a new parent
    Move {
        /// Node to move, as an id or a path
        target: String,
        /// Destination category, as an id or a path (omit for the root)
        #[arg(long)]
        parent: Option<String>,
        /// Position among the new siblings (default: append)
        #[arg(long)]
        position: Option<usize>,
    },
}

pub fn handle(config_path: &Path, command: SavedCommands) -> anyhow::Result<()> {
    let store = ConfigStore::new(config_path);
    let mut config = store.load()?;

    match command {
        SavedCommands::List => {
            let tree = &config.saved_commands;
            if tree.is_empty() {
                println!("No saved commands in {}", config_path.display());
                return Ok(());
            }
            for (depth, id) in tree.walk() {
                let indent = "  ".repeat(depth);
                match tree.node(id) {
                    Some(NodeKind::Category { name }) => {
                        println!("{}{}", indent, name.bold())
                    }
                    Some(NodeKind::Command {
                        label,
                        command_text,
                        ..
                    }) => {
                        println!("{}{} {}", indent, label, command_text.dimmed())
                    }
                    None => {}
                }
            }
        }
        SavedCommands::Add {
            label,
            command,
            parent,
            position,
        } => {
            let parent_id = match parent.as_deref() {
                Some(path) => Some(config.saved_commands.resolve(path)?),
                None => None,
            };
            let node = match command {
                Some(command_text) => NewNode::Command {
                    label: label.clone(),
                    command_text,
                },
                None => NewNode::Category {
                    name: label.clone(),
                },
            };
            let id = config.saved_commands.insert(parent_id, node, position)?;
            store.save(&config)?;
            println!("{} added '{}' ({})", "✅".green(), label, id);
        }
        SavedCommands::Remove { target } => {
            let id = config.saved_commands.resolve(&target)?;
            config.saved_commands.remove(id)?;
            store.save(&config)?;
            println!("{} removed '{}'", "✅".green(), target);
        }
        SavedCommands::Move {
            target,
            parent,
            position,
        } => {
            let id = config.saved_commands.resolve(&target)?;
            let parent_id = match parent.as_deref() {
                Some(path) => Some(config.saved_commands.resolve(path)?),
                None => None,
            };
            config.saved_commands.move_node(id, parent_id, position)?;
            store.save(&config)?;
            println!("{} moved '{}'", "✅".green(), target);
        }
    }

    Ok(())
}
