use std::io;

use color_eyre::Result;
use cryptoshield_core::{CredentialEntry, LegacyCodec};
use cryptoshield_storage::{CredentialStore, UpsertOutcome};

use crate::unlock::{read_secret_line, with_guidance};

/// One-shot credential operations against an open store.
pub enum CredentialCommand {
    List { show_secrets: bool },
    Search { query: String, show_secrets: bool },
    Add {
        website: String,
        username: String,
        secret: Option<String>,
    },
    Delete { website: String, username: String },
    MigrateLegacy,
}

pub fn handle(cmd: CredentialCommand, store: &CredentialStore) -> Result<()> {
    match cmd {
        CredentialCommand::List { show_secrets } => {
            let entries = store.load().map_err(with_guidance)?;
            print_entries(store, &entries, show_secrets)?;
        }
        CredentialCommand::Search {
            query,
            show_secrets,
        } => {
            let entries = store.search(&query).map_err(with_guidance)?;
            print_entries(store, &entries, show_secrets)?;
        }
        CredentialCommand::Add {
            website,
            username,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => {
                    eprint!("Secret for {username}@{website}: ");
                    read_secret_line(&mut io::stdin().lock())?
                }
            };
            let entry = CredentialEntry::new(website, username, secret);
            match store.upsert(&entry).map_err(with_guidance)? {
                UpsertOutcome::Added => println!("Saved {}", key_label(&entry)),
                UpsertOutcome::Replaced => println!("Updated {}", key_label(&entry)),
            }
        }
        CredentialCommand::Delete { website, username } => {
            let removed = store
                .delete_by_key(&website, &username)
                .map_err(with_guidance)?;
            if removed == 0 {
                println!("No entry for {username}@{website}.");
            } else {
                println!("Deleted {username}@{website}.");
            }
        }
        CredentialCommand::MigrateLegacy => {
            let report = store.migrate(&LegacyCodec).map_err(with_guidance)?;
            println!(
                "Migrated {} legacy entr{}; {} already current, {} unreadable (left untouched).",
                report.migrated,
                if report.migrated == 1 { "y" } else { "ies" },
                report.kept,
                report.unreadable
            );
        }
    }
    Ok(())
}

fn print_entries(
    store: &CredentialStore,
    entries: &[CredentialEntry],
    show_secrets: bool,
) -> Result<()> {
    if entries.is_empty() {
        if store.has_lines().map_err(with_guidance)? {
            println!("No entries could be read. If this log predates encryption, run `cryptoshield migrate-legacy`.");
        } else {
            println!("No entries yet. Add one with `cryptoshield add <website> <username>`.");
        }
        return Ok(());
    }
    for entry in entries {
        println!("{}", render_entry(entry, show_secrets));
    }
    Ok(())
}

fn key_label(entry: &CredentialEntry) -> String {
    format!("{}@{}", entry.username, entry.website)
}

pub fn render_entry(entry: &CredentialEntry, show_secrets: bool) -> String {
    let secret = if show_secrets {
        entry.secret.as_str()
    } else {
        "********"
    };
    format!("{:<32} {:<24} {}", entry.website, entry.username, secret)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cryptoshield_core::SessionContext;

    use super::*;

    #[test]
    fn secrets_are_masked_unless_requested() {
        let entry = CredentialEntry::new("github.com", "alice", "pa55");
        assert!(!render_entry(&entry, false).contains("pa55"));
        assert!(render_entry(&entry, true).ends_with("pa55"));
        assert!(render_entry(&entry, false).starts_with("github.com"));
    }

    #[test]
    fn empty_listing_does_not_peek_at_a_revoked_drive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = Arc::new(SessionContext::new(dir.path()));
        let store = CredentialStore::new(Arc::clone(&context), Arc::new(LegacyCodec));
        print_entries(&store, &[], false).expect("empty log");

        context.revoke();
        assert!(print_entries(&store, &[], false).is_err());
    }

    #[test]
    fn add_delete_and_migrate_through_handler() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = Arc::new(SessionContext::new(dir.path()));
        let legacy = CredentialStore::new(Arc::clone(&context), Arc::new(LegacyCodec));
        legacy
            .append(&CredentialEntry::new("old.com", "ann", "x"))
            .expect("legacy append");

        handle(
            CredentialCommand::Add {
                website: "new.com".into(),
                username: "bo".into(),
                secret: Some("y".into()),
            },
            &legacy,
        )
        .expect("add");
        assert!(legacy.exists("new.com", "bo").expect("exists"));

        handle(
            CredentialCommand::Delete {
                website: "old.com".into(),
                username: "ann".into(),
            },
            &legacy,
        )
        .expect("delete");
        assert!(!legacy.exists("old.com", "ann").expect("exists"));

        handle(CredentialCommand::MigrateLegacy, &legacy).expect("migrate");
        assert_eq!(legacy.load().expect("load").len(), 1);
    }
}
