//! Command-line argument parsing for chatrag
//!
//! Provides a clap-based CLI with subcommands and verbosity control.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::errors::{RagError, Result};
use crate::rag::pipeline::TurnRequest;

/// chatrag - retrieval-augmented chat over local models
#[derive(Parser, Debug)]
#[command(name = "chatrag")]
#[command(version)]
#[command(about = "Hybrid retrieval with streamed, history-backed chat turns", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-process vector store and a hashing embedder instead of Qdrant
    /// and a downloaded model. The index starts empty on every run, so it
    /// cannot be combined with `chat --collection`.
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// Verbosity: -v (debug), -vv (trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn and stream SSE frames to stdout
    Chat(ChatArgs),

    /// Stream an article written from a prompt; no history is kept
    Article {
        /// Owner of the request
        #[arg(long, default_value = "local")]
        owner: String,

        prompt: String,
    },

    /// List stored sessions, or print one
    History {
        /// Session to print
        session_id: Option<String>,
    },

    /// Delete a conversation history
    Delete {
        session_id: String,
    },

    /// Handle deletion events, one JSON payload per stdin line
    Consume,

    /// Manage indexed collections
    #[command(subcommand)]
    Index(IndexCommand),

    /// Display current configuration
    Config,
}

#[derive(ClapArgs, Debug)]
pub struct ChatArgs {
    /// Session id (alphanumerics, '-' and '_')
    #[arg(short, long)]
    pub session: String,

    /// Owner recorded on new sessions
    #[arg(long, default_value = "local")]
    pub owner: String,

    /// Collection to retrieve from
    #[arg(long)]
    pub collection: Option<String>,

    /// Restrict retrieval to one source document
    #[arg(long, requires = "collection")]
    pub scope: Option<String>,

    /// Summarize the scoped document instead of answering a message
    #[arg(long, conflicts_with = "message")]
    pub summary: bool,

    /// User message
    #[arg(required_unless_present = "summary")]
    pub message: Option<String>,
}

impl ChatArgs {
    pub fn to_request(&self) -> TurnRequest {
        let request = match (&self.message, self.summary) {
            (Some(message), false) => TurnRequest::chat(&self.session, &self.owner, message),
            _ => TurnRequest::summary(&self.session, &self.owner),
        };
        match &self.collection {
            Some(collection) => request.with_collection(collection, self.scope.as_deref()),
            None => request,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum IndexCommand {
    /// Create a collection sized to the embedder
    Create { collection: String },

    /// List collections
    List,

    /// Index a text file as one document; passages are separated by blank lines
    Add {
        collection: String,
        scope_id: String,
        file: PathBuf,
    },

    /// Remove every passage of one document
    Remove { collection: String, scope_id: String },
}

impl Args {
    /// Reject flag combinations that cannot work
    pub fn validate(&self) -> Result<()> {
        if let Commands::Chat(chat) = &self.command {
            if self.in_memory && chat.collection.is_some() {
                return Err(RagError::ValidationError(
                    "--in-memory starts with an empty index; --collection needs a persistent store"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Log filter implied by -v / -q, if any
    pub fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

/// Split a document into passages at blank lines
pub fn split_passages(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::context::TurnKind;

    #[test]
    fn test_parse_chat() {
        let args = Args::try_parse_from([
            "chatrag", "chat", "-s", "s1", "--collection", "docs", "--scope", "7", "hello",
        ])
        .unwrap();

        let Commands::Chat(chat) = args.command else {
            panic!("expected chat");
        };
        let request = chat.to_request();
        assert_eq!(request.session_id, "s1");
        assert_eq!(request.owner_id, "local");
        assert_eq!(request.collection.as_deref(), Some("docs"));
        assert_eq!(request.scope_id.as_deref(), Some("7"));
        assert_eq!(
            request.kind,
            TurnKind::Chat {
                message: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_parse_summary() {
        let args = Args::try_parse_from(["chatrag", "chat", "-s", "s1", "--summary"]).unwrap();
        let Commands::Chat(chat) = args.command else {
            panic!("expected chat");
        };
        assert_eq!(chat.to_request().kind, TurnKind::Summary);
    }

    #[test]
    fn test_chat_requires_message_or_summary() {
        assert!(Args::try_parse_from(["chatrag", "chat", "-s", "s1"]).is_err());
        assert!(Args::try_parse_from(["chatrag", "chat", "-s", "s1", "--summary", "hi"]).is_err());
    }

    #[test]
    fn test_scope_requires_collection() {
        assert!(Args::try_parse_from(["chatrag", "chat", "-s", "s1", "--scope", "7", "hi"]).is_err());
    }

    #[test]
    fn test_in_memory_rejects_collection() {
        let args = Args::try_parse_from([
            "chatrag", "chat", "--in-memory", "-s", "s1", "--collection", "docs", "hi",
        ])
        .unwrap();
        assert!(matches!(args.validate(), Err(RagError::ValidationError(_))));

        let args = Args::try_parse_from(["chatrag", "chat", "--in-memory", "-s", "s1", "hi"]).unwrap();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_article() {
        let args = Args::try_parse_from(["chatrag", "article", "Write about tides"]).unwrap();
        let Commands::Article { owner, prompt } = args.command else {
            panic!("expected article");
        };
        assert_eq!(owner, "local");
        assert_eq!(prompt, "Write about tides");
    }

    #[test]
    fn test_global_flags() {
        let args = Args::try_parse_from(["chatrag", "history", "--in-memory", "-vv"]).unwrap();
        assert!(args.in_memory);
        assert_eq!(args.log_level(), Some("trace"));

        let args = Args::try_parse_from(["chatrag", "-q", "config"]).unwrap();
        assert_eq!(args.log_level(), Some("error"));
    }

    #[test]
    fn test_parse_index_add() {
        let args =
            Args::try_parse_from(["chatrag", "index", "add", "docs", "7", "notes.txt"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Index(IndexCommand::Add { ref collection, .. }) if collection == "docs"
        ));
    }

    #[test]
    fn test_split_passages() {
        let text = "first line\ncontinues\n\n\n  second  \n\n";
        assert_eq!(split_passages(text), vec!["first line continues", "second"]);
    }
}
